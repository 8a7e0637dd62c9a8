use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

use crate::browser::{Step, Target};

pub const ARG_ACCOUNT: &str = "account";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_PAPER_ACCOUNT: &str = "paper-account";
pub const ARG_STARTUP_TIMEOUT: &str = "startup-timeout";
pub const ARG_STARTUP_POLL_INTERVAL: &str = "startup-poll-interval";
pub const ARG_PAGE_LOAD_TIMEOUT: &str = "page-load-timeout";
pub const ARG_STEP_TIMEOUT: &str = "step-timeout";
pub const ARG_VALIDATE_TIMEOUT: &str = "validate-timeout";
pub const ARG_MIN_PRESUBMIT_BUFFER: &str = "min-presubmit-buffer";
pub const ARG_MAX_PRESUBMIT_BUFFER: &str = "max-presubmit-buffer";
pub const ARG_OUTPUTS_DIR: &str = "outputs-dir";
pub const ARG_ERROR_SCREENSHOTS: &str = "error-screenshots";

/// Element target overrides, `TYPE@@identifier`.
pub const TARGET_ARGS: [(Step, &str, &str); 11] = [
    (Step::UserName, "target-user-name", "GATEKEEP_TARGET_USER_NAME"),
    (Step::Password, "target-password", "GATEKEEP_TARGET_PASSWORD"),
    (Step::Submit, "target-submit", "GATEKEEP_TARGET_SUBMIT"),
    (Step::Success, "target-success", "GATEKEEP_TARGET_SUCCESS"),
    (Step::Error, "target-error", "GATEKEEP_TARGET_ERROR"),
    (Step::TwoFa, "target-two-fa", "GATEKEEP_TARGET_TWO_FA"),
    (Step::TwoFaSelect, "target-two-fa-select", "GATEKEEP_TARGET_TWO_FA_SELECT"),
    (
        Step::TwoFaNotification,
        "target-two-fa-notification",
        "GATEKEEP_TARGET_TWO_FA_NOTIFICATION",
    ),
    (Step::TwoFaInput, "target-two-fa-input", "GATEKEEP_TARGET_TWO_FA_INPUT"),
    (Step::KeyPromo, "target-key-promo", "GATEKEEP_TARGET_KEY_PROMO"),
    (Step::PaperToggle, "target-paper-toggle", "GATEKEEP_TARGET_PAPER_TOGGLE"),
];

#[derive(Debug, Clone)]
pub struct Options {
    pub account: String,
    pub password: SecretString,
    pub paper_account: bool,
    pub startup_timeout: u64,
    pub startup_poll_interval: u64,
    pub page_load_timeout: u64,
    pub step_timeout: u64,
    pub validate_timeout: u64,
    pub min_presubmit_buffer: u64,
    pub max_presubmit_buffer: u64,
    pub outputs_dir: PathBuf,
    pub error_screenshots: bool,
    pub targets: Vec<(Step, Target)>,
}

impl Options {
    /// # Errors
    /// Returns an error if the account or password is missing or empty.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let account = matches
            .get_one::<String>(ARG_ACCOUNT)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("missing required argument: --{ARG_ACCOUNT}"))?;
        let password = matches
            .get_one::<String>(ARG_PASSWORD)
            .cloned()
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
            .with_context(|| format!("missing required argument: --{ARG_PASSWORD}"))?;

        let seconds = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        let targets = TARGET_ARGS
            .iter()
            .filter_map(|(step, id, _)| {
                matches
                    .get_one::<Target>(id)
                    .map(|target| (*step, target.clone()))
            })
            .collect();

        Ok(Self {
            account,
            password,
            paper_account: matches.get_flag(ARG_PAPER_ACCOUNT),
            startup_timeout: seconds(ARG_STARTUP_TIMEOUT, 300),
            startup_poll_interval: seconds(ARG_STARTUP_POLL_INTERVAL, 2),
            page_load_timeout: seconds(ARG_PAGE_LOAD_TIMEOUT, 60),
            step_timeout: seconds(ARG_STEP_TIMEOUT, 15),
            validate_timeout: seconds(ARG_VALIDATE_TIMEOUT, 10),
            min_presubmit_buffer: seconds(ARG_MIN_PRESUBMIT_BUFFER, 5),
            max_presubmit_buffer: seconds(ARG_MAX_PRESUBMIT_BUFFER, 30),
            outputs_dir: matches
                .get_one::<PathBuf>(ARG_OUTPUTS_DIR)
                .cloned()
                .unwrap_or_else(|| PathBuf::from("outputs")),
            error_screenshots: matches.get_flag(ARG_ERROR_SCREENSHOTS),
            targets,
        })
    }
}

fn seconds_arg(id: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_ACCOUNT)
                .short('a')
                .long(ARG_ACCOUNT)
                .help("Account user name")
                .env("GATEKEEP_ACCOUNT")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long(ARG_PASSWORD)
                .help("Account password")
                .env("GATEKEEP_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PAPER_ACCOUNT)
                .long(ARG_PAPER_ACCOUNT)
                .help("Log in to the paper trading account")
                .env("GATEKEEP_PAPER_ACCOUNT")
                .action(ArgAction::SetTrue),
        );

    let command = with_timing_args(command);
    let command = with_target_args(command);

    command
        .arg(
            Arg::new(ARG_OUTPUTS_DIR)
                .long(ARG_OUTPUTS_DIR)
                .help("Directory for failure screenshots")
                .env("GATEKEEP_OUTPUTS_DIR")
                .default_value("outputs")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_ERROR_SCREENSHOTS)
                .long(ARG_ERROR_SCREENSHOTS)
                .help("Save a screenshot when a login attempt fails")
                .env("GATEKEEP_ERROR_SCREENSHOTS")
                .action(ArgAction::SetTrue),
        )
}

fn with_timing_args(command: Command) -> Command {
    command
        .arg(seconds_arg(
            ARG_STARTUP_TIMEOUT,
            "GATEKEEP_STARTUP_TIMEOUT",
            "300",
            "Seconds to wait for the gateway to accept connections",
        ))
        .arg(seconds_arg(
            ARG_STARTUP_POLL_INTERVAL,
            "GATEKEEP_STARTUP_POLL_INTERVAL",
            "2",
            "Seconds between gateway startup probes",
        ))
        .arg(seconds_arg(
            ARG_PAGE_LOAD_TIMEOUT,
            "GATEKEEP_PAGE_LOAD_TIMEOUT",
            "60",
            "Seconds to wait for the login form",
        ))
        .arg(seconds_arg(
            ARG_STEP_TIMEOUT,
            "GATEKEEP_STEP_TIMEOUT",
            "15",
            "Seconds to wait for the page to react after submitting",
        ))
        .arg(seconds_arg(
            ARG_VALIDATE_TIMEOUT,
            "GATEKEEP_VALIDATE_TIMEOUT",
            "10",
            "Seconds to wait for the gateway to confirm a login",
        ))
        .arg(seconds_arg(
            ARG_MIN_PRESUBMIT_BUFFER,
            "GATEKEEP_MIN_PRESUBMIT_BUFFER",
            "5",
            "Initial pause in seconds between filling and submitting credentials",
        ))
        .arg(seconds_arg(
            ARG_MAX_PRESUBMIT_BUFFER,
            "GATEKEEP_MAX_PRESUBMIT_BUFFER",
            "30",
            "Upper bound in seconds for the presubmit pause",
        ))
}

fn with_target_args(command: Command) -> Command {
    TARGET_ARGS.iter().fold(command, |command, (step, id, env)| {
        command.arg(
            Arg::new(*id)
                .long(*id)
                .help(format!("Element target for the {step:?} step, TYPE@@identifier"))
                .env(*env)
                .value_parser(|value: &str| value.parse::<Target>()),
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::browser::TargetKind;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("gatekeep"))
    }

    #[test]
    fn credentials_from_env() {
        temp_env::with_vars(
            [
                ("GATEKEEP_ACCOUNT", Some("trader")),
                ("GATEKEEP_PASSWORD", Some("s3cret")),
                ("GATEKEEP_PAPER_ACCOUNT", Some("true")),
                ("GATEKEEP_STEP_TIMEOUT", Some("20")),
            ],
            || {
                let matches = command().get_matches_from(vec!["gatekeep"]);
                let options = Options::parse(&matches).unwrap();
                assert_eq!(options.account, "trader");
                assert_eq!(options.password.expose_secret(), "s3cret");
                assert!(options.paper_account);
                assert_eq!(options.step_timeout, 20);
                assert_eq!(options.startup_timeout, 300);
                assert!(options.targets.is_empty());
            },
        );
    }

    #[test]
    fn password_is_required() {
        temp_env::with_vars_unset(["GATEKEEP_ACCOUNT", "GATEKEEP_PASSWORD"], || {
            let result = command().try_get_matches_from(vec!["gatekeep", "--account", "trader"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn empty_account_is_rejected() {
        temp_env::with_vars(
            [
                ("GATEKEEP_ACCOUNT", Some(" ")),
                ("GATEKEEP_PASSWORD", Some("s3cret")),
            ],
            || {
                let matches = command().get_matches_from(vec!["gatekeep"]);
                assert!(Options::parse(&matches)
                    .unwrap_err()
                    .to_string()
                    .contains("--account"));
            },
        );
    }

    #[test]
    fn targets_are_parsed() {
        temp_env::with_vars_unset(["GATEKEEP_TARGET_SUBMIT"], || {
            let matches = command().get_matches_from(vec![
                "gatekeep",
                "--account",
                "trader",
                "--password",
                "s3cret",
                "--target-submit",
                "ID@@login-button",
                "--target-success",
                "TAG_NAME@@Welcome",
            ]);
            let options = Options::parse(&matches).unwrap();
            assert_eq!(
                options.targets,
                vec![
                    (Step::Submit, Target::new(TargetKind::Id, "login-button")),
                    (Step::Success, Target::new(TargetKind::TagName, "Welcome")),
                ]
            );
        });
    }

    #[test]
    fn malformed_target_is_rejected() {
        let result = command().try_get_matches_from(vec![
            "gatekeep",
            "--account",
            "trader",
            "--password",
            "s3cret",
            "--target-error",
            "xyz-errormessage",
        ]);
        assert_eq!(
            result.map_err(|e| e.kind()).err(),
            Some(clap::error::ErrorKind::ValueValidation)
        );
    }
}
