use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::gateway::Routes;

pub const ARG_GATEWAY_URL: &str = "gateway-url";
pub const ARG_GATEWAY_TLS_VERIFY: &str = "gateway-tls-verify";
pub const ARG_GATEWAY_REQUEST_TIMEOUT: &str = "gateway-request-timeout";
pub const ARG_ROUTE_AUTH: &str = "gateway-route-auth";
pub const ARG_ROUTE_TICKLE: &str = "gateway-route-tickle";
pub const ARG_ROUTE_VALIDATE: &str = "gateway-route-validate";
pub const ARG_ROUTE_LOGOUT: &str = "gateway-route-logout";
pub const ARG_ROUTE_LIVENESS: &str = "gateway-route-liveness";
pub const ARG_WEBDRIVER_URL: &str = "webdriver-url";
pub const ARG_WEBDRIVER_HEADLESS: &str = "webdriver-headless";
pub const ARG_WEBDRIVER_TIMEOUT: &str = "webdriver-timeout";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub routes: Routes,
    pub tls_verify: bool,
    pub request_timeout: u64,
    pub webdriver_url: String,
    pub headless: bool,
    pub webdriver_timeout: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let string = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            url: string(ARG_GATEWAY_URL)?,
            routes: Routes {
                auth: string(ARG_ROUTE_AUTH)?,
                tickle: string(ARG_ROUTE_TICKLE)?,
                validate: string(ARG_ROUTE_VALIDATE)?,
                logout: string(ARG_ROUTE_LOGOUT)?,
                liveness: string(ARG_ROUTE_LIVENESS)?,
            },
            tls_verify: matches.get_flag(ARG_GATEWAY_TLS_VERIFY),
            request_timeout: matches
                .get_one::<u64>(ARG_GATEWAY_REQUEST_TIMEOUT)
                .copied()
                .unwrap_or(15),
            webdriver_url: string(ARG_WEBDRIVER_URL)?,
            headless: matches
                .get_one::<bool>(ARG_WEBDRIVER_HEADLESS)
                .copied()
                .unwrap_or(true),
            webdriver_timeout: matches
                .get_one::<u64>(ARG_WEBDRIVER_TIMEOUT)
                .copied()
                .unwrap_or(90),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command
        .arg(
            Arg::new(ARG_GATEWAY_URL)
                .long(ARG_GATEWAY_URL)
                .help("Gateway base URL")
                .env("GATEKEEP_GATEWAY_URL")
                .default_value("https://localhost:5000"),
        )
        .arg(
            Arg::new(ARG_GATEWAY_TLS_VERIFY)
                .long(ARG_GATEWAY_TLS_VERIFY)
                .help("Verify the gateway TLS certificate (it is usually self-signed)")
                .env("GATEKEEP_GATEWAY_TLS_VERIFY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_GATEWAY_REQUEST_TIMEOUT)
                .long(ARG_GATEWAY_REQUEST_TIMEOUT)
                .help("Timeout in seconds for gateway HTTP requests")
                .env("GATEKEEP_GATEWAY_REQUEST_TIMEOUT")
                .default_value("15")
                .value_parser(clap::value_parser!(u64).range(1..)),
        );

    let command = with_route_args(command);

    command
        .arg(
            Arg::new(ARG_WEBDRIVER_URL)
                .long(ARG_WEBDRIVER_URL)
                .help("WebDriver server URL (chromedriver, geckodriver)")
                .env("GATEKEEP_WEBDRIVER_URL")
                .default_value("http://localhost:9515"),
        )
        .arg(
            Arg::new(ARG_WEBDRIVER_HEADLESS)
                .long(ARG_WEBDRIVER_HEADLESS)
                .help("Run the browser without a window")
                .env("GATEKEEP_WEBDRIVER_HEADLESS")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_WEBDRIVER_TIMEOUT)
                .long(ARG_WEBDRIVER_TIMEOUT)
                .help("Timeout in seconds for a single WebDriver command")
                .env("GATEKEEP_WEBDRIVER_TIMEOUT")
                .default_value("90")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_route_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ROUTE_AUTH)
                .long(ARG_ROUTE_AUTH)
                .help("Login page path")
                .env("GATEKEEP_GATEWAY_ROUTE_AUTH")
                .default_value("/sso/Login?forwardTo=22&RL=1&ip2loc=on"),
        )
        .arg(
            Arg::new(ARG_ROUTE_TICKLE)
                .long(ARG_ROUTE_TICKLE)
                .help("Keep-alive endpoint path")
                .env("GATEKEEP_GATEWAY_ROUTE_TICKLE")
                .default_value("/v1/api/tickle"),
        )
        .arg(
            Arg::new(ARG_ROUTE_VALIDATE)
                .long(ARG_ROUTE_VALIDATE)
                .help("Session validation endpoint path")
                .env("GATEKEEP_GATEWAY_ROUTE_VALIDATE")
                .default_value("/v1/portal/sso/validate"),
        )
        .arg(
            Arg::new(ARG_ROUTE_LOGOUT)
                .long(ARG_ROUTE_LOGOUT)
                .help("Logout endpoint path")
                .env("GATEKEEP_GATEWAY_ROUTE_LOGOUT")
                .default_value("/v1/api/logout"),
        )
        .arg(
            Arg::new(ARG_ROUTE_LIVENESS)
                .long(ARG_ROUTE_LIVENESS)
                .help("Path probed while waiting for the gateway to start")
                .env("GATEKEEP_GATEWAY_ROUTE_LIVENESS")
                .default_value("/"),
        )
}
