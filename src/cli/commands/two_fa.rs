use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::{browser::Target, two_fa::StrategyKind};

pub const ARG_TWO_FA_STRATEGY: &str = "two-fa-strategy";
pub const ARG_TWO_FA_TIMEOUT: &str = "two-fa-timeout";
pub const ARG_TWO_FA_SELECT_TARGET: &str = "two-fa-select-target";
pub const ARG_TWO_FA_STRICT: &str = "two-fa-strict";
pub const ARG_TWO_FA_COMMAND: &str = "two-fa-command";
pub const ARG_TWO_FA_ATTEMPTS: &str = "two-fa-attempts";
pub const ARG_TOTP_SECRET: &str = "totp-secret";
pub const ARG_TOTP_DIGITS: &str = "totp-digits";
pub const ARG_TOTP_PERIOD: &str = "totp-period";
pub const ARG_PUSH_RETRIES: &str = "push-retries";
pub const ARG_PUSH_INTERVAL: &str = "push-interval";
pub const ARG_PUSH_RESEND_TARGET: &str = "push-resend-target";

#[derive(Debug, Clone)]
pub struct Options {
    pub strategy: StrategyKind,
    pub timeout: u64,
    pub select_target: Option<String>,
    pub strict: bool,
    pub command: Option<String>,
    pub attempts: u32,
    pub totp_secret: Option<SecretString>,
    pub totp_digits: usize,
    pub totp_period: u64,
    pub push_retries: u32,
    pub push_interval: u64,
    pub push_resend_target: Option<Target>,
}

impl Options {
    /// # Errors
    /// Returns an error if the selected strategy is missing the settings it needs.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let strategy = matches
            .get_one::<StrategyKind>(ARG_TWO_FA_STRATEGY)
            .copied()
            .unwrap_or(StrategyKind::ExternalRequest);
        let totp_secret = get_non_empty(ARG_TOTP_SECRET).map(SecretString::from);
        let command = get_non_empty(ARG_TWO_FA_COMMAND);

        match strategy {
            StrategyKind::Totp if totp_secret.is_none() => {
                anyhow::bail!("missing required argument: --{ARG_TOTP_SECRET} (required for totp)")
            }
            StrategyKind::Custom if command.is_none() => {
                anyhow::bail!("missing required argument: --{ARG_TWO_FA_COMMAND} (required for custom)")
            }
            _ => {}
        }

        Ok(Self {
            strategy,
            timeout: matches
                .get_one::<u64>(ARG_TWO_FA_TIMEOUT)
                .copied()
                .unwrap_or(120),
            select_target: get_non_empty(ARG_TWO_FA_SELECT_TARGET),
            strict: matches
                .get_one::<bool>(ARG_TWO_FA_STRICT)
                .copied()
                .unwrap_or(true),
            command,
            attempts: matches
                .get_one::<u32>(ARG_TWO_FA_ATTEMPTS)
                .copied()
                .unwrap_or(1),
            totp_secret,
            totp_digits: matches
                .get_one::<u8>(ARG_TOTP_DIGITS)
                .map_or(6, |digits| usize::from(*digits)),
            totp_period: matches.get_one::<u64>(ARG_TOTP_PERIOD).copied().unwrap_or(30),
            push_retries: matches.get_one::<u32>(ARG_PUSH_RETRIES).copied().unwrap_or(10),
            push_interval: matches.get_one::<u64>(ARG_PUSH_INTERVAL).copied().unwrap_or(10),
            push_resend_target: matches.get_one::<Target>(ARG_PUSH_RESEND_TARGET).cloned(),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_TWO_FA_STRATEGY)
                .long(ARG_TWO_FA_STRATEGY)
                .help("2FA strategy: totp, push-notification, external-request, custom")
                .env("GATEKEEP_TWO_FA_STRATEGY")
                .default_value("external-request")
                .value_parser(|value: &str| value.parse::<StrategyKind>()),
        )
        .arg(
            Arg::new(ARG_TWO_FA_TIMEOUT)
                .long(ARG_TWO_FA_TIMEOUT)
                .help("Seconds to wait for a 2FA challenge to be answered")
                .env("GATEKEEP_TWO_FA_TIMEOUT")
                .default_value("120")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TWO_FA_SELECT_TARGET)
                .long(ARG_TWO_FA_SELECT_TARGET)
                .help("Device to pick when the page lists several, matched by exact name")
                .env("GATEKEEP_TWO_FA_SELECT_TARGET"),
        )
        .arg(
            Arg::new(ARG_TWO_FA_STRICT)
                .long(ARG_TWO_FA_STRICT)
                .help("Reject codes that are not exactly six digits")
                .env("GATEKEEP_TWO_FA_STRICT")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_TWO_FA_COMMAND)
                .long(ARG_TWO_FA_COMMAND)
                .help("Shell command printing the 2FA code (custom strategy)")
                .env("GATEKEEP_TWO_FA_COMMAND"),
        )
        .arg(
            Arg::new(ARG_TWO_FA_ATTEMPTS)
                .long(ARG_TWO_FA_ATTEMPTS)
                .help("Codes to try before giving up when the login page rejects a 2FA code")
                .env("GATEKEEP_TWO_FA_ATTEMPTS")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        );

    command
        .arg(
            Arg::new(ARG_TOTP_SECRET)
                .long(ARG_TOTP_SECRET)
                .help("Base32 TOTP shared secret (totp strategy)")
                .env("GATEKEEP_TOTP_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOTP_DIGITS)
                .long(ARG_TOTP_DIGITS)
                .help("TOTP code length")
                .env("GATEKEEP_TOTP_DIGITS")
                .default_value("6")
                .value_parser(clap::value_parser!(u8).range(6..=8)),
        )
        .arg(
            Arg::new(ARG_TOTP_PERIOD)
                .long(ARG_TOTP_PERIOD)
                .help("TOTP time step in seconds")
                .env("GATEKEEP_TOTP_PERIOD")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PUSH_RETRIES)
                .long(ARG_PUSH_RETRIES)
                .help("How many times to resend a push notification")
                .env("GATEKEEP_PUSH_RETRIES")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PUSH_INTERVAL)
                .long(ARG_PUSH_INTERVAL)
                .help("Seconds between push notification resends")
                .env("GATEKEEP_PUSH_INTERVAL")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_PUSH_RESEND_TARGET)
                .long(ARG_PUSH_RESEND_TARGET)
                .help("Element target of the resend control, TYPE@@identifier")
                .env("GATEKEEP_PUSH_RESEND_TARGET")
                .value_parser(|value: &str| value.parse::<Target>()),
        )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("gatekeep"))
    }

    const VARS: [&str; 5] = [
        "GATEKEEP_TWO_FA_STRATEGY",
        "GATEKEEP_TOTP_SECRET",
        "GATEKEEP_TWO_FA_COMMAND",
        "GATEKEEP_TWO_FA_STRICT",
        "GATEKEEP_TWO_FA_ATTEMPTS",
    ];

    #[test]
    fn external_request_by_default() {
        temp_env::with_vars_unset(VARS, || {
            let matches = command().get_matches_from(vec!["gatekeep"]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(options.strategy, StrategyKind::ExternalRequest);
            assert!(options.strict);
            assert_eq!(options.timeout, 120);
            assert_eq!(options.totp_digits, 6);
            assert_eq!(options.attempts, 1);
        });
    }

    #[test]
    fn attempts_must_be_positive() {
        temp_env::with_vars_unset(VARS, || {
            let matches =
                command().get_matches_from(vec!["gatekeep", "--two-fa-attempts", "3"]);
            assert_eq!(Options::parse(&matches).unwrap().attempts, 3);

            assert!(command()
                .try_get_matches_from(vec!["gatekeep", "--two-fa-attempts", "0"])
                .is_err());
        });
    }

    #[test]
    fn totp_needs_secret() {
        temp_env::with_vars_unset(VARS, || {
            let matches = command().get_matches_from(vec!["gatekeep", "--two-fa-strategy", "totp"]);
            assert!(Options::parse(&matches)
                .unwrap_err()
                .to_string()
                .contains("--totp-secret"));
        });
    }

    #[test]
    fn totp_from_env() {
        temp_env::with_vars(
            [
                ("GATEKEEP_TWO_FA_STRATEGY", Some("totp")),
                ("GATEKEEP_TOTP_SECRET", Some("JBSWY3DPEHPK3PXP")),
                ("GATEKEEP_TOTP_DIGITS", Some("8")),
            ],
            || {
                let matches = command().get_matches_from(vec!["gatekeep"]);
                let options = Options::parse(&matches).unwrap();
                assert_eq!(options.strategy, StrategyKind::Totp);
                assert_eq!(
                    options.totp_secret.unwrap().expose_secret(),
                    "JBSWY3DPEHPK3PXP"
                );
                assert_eq!(options.totp_digits, 8);
            },
        );
    }

    #[test]
    fn custom_needs_command() {
        temp_env::with_vars_unset(VARS, || {
            let matches =
                command().get_matches_from(vec!["gatekeep", "--two-fa-strategy", "custom"]);
            assert!(Options::parse(&matches).is_err());

            let matches = command().get_matches_from(vec![
                "gatekeep",
                "--two-fa-strategy",
                "custom",
                "--two-fa-command",
                "echo 123456",
            ]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(options.command.as_deref(), Some("echo 123456"));
        });
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        temp_env::with_vars_unset(VARS, || {
            let result =
                command().try_get_matches_from(vec!["gatekeep", "--two-fa-strategy", "sms"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::ValueValidation)
            );
        });
    }
}
