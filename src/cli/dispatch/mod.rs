//! Turns validated CLI matches into the server action and its typed configuration.

use crate::{
    auth::{Credentials, LoginConfig},
    browser::{Step, Targets, WebDriverConfig},
    cli::{
        actions::{server::Args, Action},
        commands::{gateway, login, service, two_fa},
    },
    gateway::GatewayConfig,
    health::HealthConfig,
    session::MaintainerConfig,
    two_fa::{
        AckMailbox, CommandTwoFa, PushSettings, StrategyKind, TotpGenerator, TwoFaConfig,
        TwoFaStrategy,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let gateway_opts = gateway::Options::parse(matches)?;
    let login_opts = login::Options::parse(matches)?;
    let two_fa_opts = two_fa::Options::parse(matches)?;
    let service_opts = service::Options::parse(matches)?;

    let gateway = GatewayConfig::new(&gateway_opts.url)
        .context("invalid GATEKEEP_GATEWAY_URL")?
        .with_routes(gateway_opts.routes)
        .with_request_timeout(Duration::from_secs(gateway_opts.request_timeout))
        .with_tls_verify(gateway_opts.tls_verify);

    let webdriver = WebDriverConfig::new(gateway_opts.webdriver_url)
        .with_headless(gateway_opts.headless)
        .with_page_load_timeout(Duration::from_secs(login_opts.page_load_timeout))
        .with_request_timeout(Duration::from_secs(gateway_opts.webdriver_timeout));

    let targets = login_opts
        .targets
        .into_iter()
        .fold(Targets::default(), |targets, (step, target)| {
            targets.with(step, target)
        });

    let login = LoginConfig::new(gateway.login_url())
        .with_startup_timeout(Duration::from_secs(login_opts.startup_timeout))
        .with_startup_poll_interval(Duration::from_secs(login_opts.startup_poll_interval))
        .with_page_load_timeout(Duration::from_secs(login_opts.page_load_timeout))
        .with_step_timeout(Duration::from_secs(login_opts.step_timeout))
        .with_validate_timeout(Duration::from_secs(login_opts.validate_timeout))
        .with_presubmit_buffer(
            Duration::from_secs(login_opts.min_presubmit_buffer),
            Duration::from_secs(login_opts.max_presubmit_buffer),
        )
        .with_paper_account(login_opts.paper_account)
        .with_two_fa_attempts(two_fa_opts.attempts)
        .with_error_screenshots(login_opts.error_screenshots, login_opts.outputs_dir)
        .with_targets(targets);

    let mailbox = AckMailbox::new();

    let strategy = match two_fa_opts.strategy {
        StrategyKind::Totp => {
            let secret = two_fa_opts
                .totp_secret
                .as_ref()
                .context("missing required argument: --totp-secret")?;
            TwoFaStrategy::Totp(Arc::new(
                TotpGenerator::new(secret, two_fa_opts.totp_digits, two_fa_opts.totp_period)
                    .context("invalid GATEKEEP_TOTP_SECRET")?,
            ))
        }
        StrategyKind::PushNotification => {
            let mut push = PushSettings::new(login.targets().get(Step::Success).clone())
                .with_retries(two_fa_opts.push_retries)
                .with_interval(Duration::from_secs(two_fa_opts.push_interval));
            if let Some(resend) = two_fa_opts.push_resend_target {
                push = push.with_resend(resend);
            }
            TwoFaStrategy::PushNotification(push)
        }
        StrategyKind::ExternalRequest => TwoFaStrategy::ExternalRequest(mailbox.clone()),
        StrategyKind::Custom => {
            let command = two_fa_opts
                .command
                .as_deref()
                .context("missing required argument: --two-fa-command")?;
            TwoFaStrategy::Custom(Arc::new(CommandTwoFa::shell(command)))
        }
    };

    let two_fa = TwoFaConfig::new()
        .with_timeout(Duration::from_secs(two_fa_opts.timeout))
        .with_select_target(two_fa_opts.select_target)
        .with_strict_code(two_fa_opts.strict);

    let maintainer = MaintainerConfig::new()
        .with_interval(Duration::from_secs(service_opts.maintenance_interval))
        .with_max_failed_auth(service_opts.max_failed_auth)
        .with_max_transient_failures(service_opts.max_transient_failures)
        .with_start_active(service_opts.start_active);

    let health = HealthConfig::new()
        .with_port(service_opts.port)
        .with_paths(service_opts.paths);

    Ok(Action::Server(Args {
        credentials: Credentials::new(login_opts.account, login_opts.password),
        gateway,
        webdriver,
        login,
        two_fa,
        strategy,
        mailbox,
        maintainer,
        health,
        logout_on_shutdown: service_opts.logout_on_shutdown,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::commands;

    const BASE: [(&str, Option<&str>); 6] = [
        ("GATEKEEP_ACCOUNT", Some("trader")),
        ("GATEKEEP_PASSWORD", Some("s3cret")),
        ("GATEKEEP_TWO_FA_STRATEGY", None),
        ("GATEKEEP_TOTP_SECRET", None),
        ("GATEKEEP_GATEWAY_URL", None),
        ("GATEKEEP_PORT", None),
    ];

    fn server_args(extra: &[&str]) -> Result<Args> {
        let mut argv = vec!["gatekeep"];
        argv.extend_from_slice(extra);
        let matches = commands::new().get_matches_from(argv);
        match handler(&matches)? {
            Action::Server(args) => Ok(args),
        }
    }

    #[test]
    fn defaults_build_server_args() {
        temp_env::with_vars(BASE, || {
            let args = server_args(&[]).unwrap();
            assert_eq!(args.credentials.account, "trader");
            assert_eq!(args.strategy.kind(), StrategyKind::ExternalRequest);
            assert_eq!(args.health.port(), 5001);
            assert_eq!(
                args.gateway.login_url(),
                "https://localhost:5000/sso/Login?forwardTo=22&RL=1&ip2loc=on"
            );
            assert!(!args.logout_on_shutdown);
        });
    }

    #[test]
    fn totp_strategy_is_built() {
        temp_env::with_vars(BASE, || {
            let args = server_args(&[
                "--two-fa-strategy",
                "totp",
                "--totp-secret",
                "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ",
            ])
            .unwrap();
            assert_eq!(args.strategy.kind(), StrategyKind::Totp);
        });
    }

    #[test]
    fn invalid_totp_secret_is_rejected() {
        temp_env::with_vars(BASE, || {
            let err = server_args(&["--two-fa-strategy", "totp", "--totp-secret", "not base32!"])
                .unwrap_err();
            assert!(err.to_string().contains("GATEKEEP_TOTP_SECRET"));
        });
    }

    #[test]
    fn invalid_gateway_url_is_rejected() {
        temp_env::with_vars(BASE, || {
            let err = server_args(&["--gateway-url", "ftp://gateway"]).unwrap_err();
            assert!(err.to_string().contains("GATEKEEP_GATEWAY_URL"));
        });
    }

    #[test]
    fn target_overrides_reach_login_config() {
        temp_env::with_vars(BASE, || {
            let args = server_args(&["--target-submit", "ID@@go"]).unwrap();
            assert_eq!(args.login.targets().get(Step::Submit).identifier(), "go");
            assert_eq!(
                args.login.targets().get(Step::UserName),
                Targets::default().get(Step::UserName)
            );
        });
    }
}
