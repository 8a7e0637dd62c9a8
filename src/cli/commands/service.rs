use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::health::HealthPaths;

pub const ARG_PORT: &str = "port";
pub const ARG_MAINTENANCE_INTERVAL: &str = "maintenance-interval";
pub const ARG_MAX_FAILED_AUTH: &str = "max-failed-auth";
pub const ARG_MAX_TRANSIENT_FAILURES: &str = "max-transient-failures";
pub const ARG_START_ACTIVE: &str = "start-active";
pub const ARG_LOGOUT_ON_SHUTDOWN: &str = "logout-on-shutdown";
pub const ARG_PATH_LIVENESS: &str = "path-liveness";
pub const ARG_PATH_READINESS: &str = "path-readiness";
pub const ARG_PATH_STATUS: &str = "path-status";
pub const ARG_PATH_ACTIVATE: &str = "path-activate";
pub const ARG_PATH_DEACTIVATE: &str = "path-deactivate";
pub const ARG_PATH_AUTHENTICATE: &str = "path-authenticate";
pub const ARG_PATH_TWO_FA: &str = "path-two-fa";

#[derive(Debug, Clone)]
pub struct Options {
    pub port: u16,
    pub paths: HealthPaths,
    pub maintenance_interval: u64,
    pub max_failed_auth: u32,
    pub max_transient_failures: u32,
    pub start_active: bool,
    pub logout_on_shutdown: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a path is missing or the paths are not absolute and distinct.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let path = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        let paths = HealthPaths {
            liveness: path(ARG_PATH_LIVENESS)?,
            readiness: path(ARG_PATH_READINESS)?,
            status: path(ARG_PATH_STATUS)?,
            activate: path(ARG_PATH_ACTIVATE)?,
            deactivate: path(ARG_PATH_DEACTIVATE)?,
            authenticate: path(ARG_PATH_AUTHENTICATE)?,
            two_fa: path(ARG_PATH_TWO_FA)?,
        };
        paths.validate()?;

        Ok(Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(5001),
            paths,
            maintenance_interval: matches
                .get_one::<u64>(ARG_MAINTENANCE_INTERVAL)
                .copied()
                .unwrap_or(60),
            max_failed_auth: matches
                .get_one::<u32>(ARG_MAX_FAILED_AUTH)
                .copied()
                .unwrap_or(5),
            max_transient_failures: matches
                .get_one::<u32>(ARG_MAX_TRANSIENT_FAILURES)
                .copied()
                .unwrap_or(0),
            start_active: matches
                .get_one::<bool>(ARG_START_ACTIVE)
                .copied()
                .unwrap_or(true),
            logout_on_shutdown: matches.get_flag(ARG_LOGOUT_ON_SHUTDOWN),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port the health server listens on")
                .env("GATEKEEP_PORT")
                .default_value("5001")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_MAINTENANCE_INTERVAL)
                .long(ARG_MAINTENANCE_INTERVAL)
                .help("Seconds between session checks")
                .env("GATEKEEP_MAINTENANCE_INTERVAL")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX_FAILED_AUTH)
                .long(ARG_MAX_FAILED_AUTH)
                .help("Failed logins before automatic login stops (0 disables the limit)")
                .env("GATEKEEP_MAX_FAILED_AUTH")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_MAX_TRANSIENT_FAILURES)
                .long(ARG_MAX_TRANSIENT_FAILURES)
                .help("Consecutive keep-alive errors counted as one failed login (0 never counts them)")
                .env("GATEKEEP_MAX_TRANSIENT_FAILURES")
                .default_value("0")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_START_ACTIVE)
                .long(ARG_START_ACTIVE)
                .help("Start maintaining the session immediately")
                .env("GATEKEEP_START_ACTIVE")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_LOGOUT_ON_SHUTDOWN)
                .long(ARG_LOGOUT_ON_SHUTDOWN)
                .help("Log out of the gateway when the process stops")
                .env("GATEKEEP_LOGOUT_ON_SHUTDOWN")
                .action(ArgAction::SetTrue),
        );

    with_path_args(command)
}

fn with_path_args(command: Command) -> Command {
    [
        (ARG_PATH_LIVENESS, "GATEKEEP_PATH_LIVENESS", "/livez", "Liveness probe path"),
        (ARG_PATH_READINESS, "GATEKEEP_PATH_READINESS", "/readyz", "Readiness probe path"),
        (ARG_PATH_STATUS, "GATEKEEP_PATH_STATUS", "/status", "Status path"),
        (ARG_PATH_ACTIVATE, "GATEKEEP_PATH_ACTIVATE", "/activate", "Resume maintenance path"),
        (
            ARG_PATH_DEACTIVATE,
            "GATEKEEP_PATH_DEACTIVATE",
            "/deactivate",
            "Pause maintenance path",
        ),
        (
            ARG_PATH_AUTHENTICATE,
            "GATEKEEP_PATH_AUTHENTICATE",
            "/authenticate",
            "Manual authentication path",
        ),
        (ARG_PATH_TWO_FA, "GATEKEEP_PATH_TWO_FA", "/two-fa", "2FA acknowledgment path"),
    ]
    .into_iter()
    .fold(command, |command, (id, env, default, help)| {
        command.arg(
            Arg::new(id)
                .long(id)
                .help(help)
                .env(env)
                .default_value(default),
        )
    })
}
