use crate::cli::{actions::Action, commands, config_file, dispatch, telemetry};
use anyhow::Result;
use tracing::info;

/// Map verbosity count to tracing level
const fn get_verbosity_level(verbosity: u8) -> Option<tracing::Level> {
    match verbosity {
        0 => None,
        1 => Some(tracing::Level::WARN),
        2 => Some(tracing::Level::INFO),
        3 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Main entry point for the CLI - builds and returns the Action
///
/// # Errors
///
/// Returns an error if the settings file cannot be loaded, or if telemetry initialization or
/// action dispatch fails
pub fn start() -> Result<Action> {
    // settings file values become environment defaults before clap reads them
    let config = config_file::load(std::env::args())?;

    let matches = commands::new().get_matches();

    let verbosity_level = get_verbosity_level(
        matches
            .get_one::<u8>(commands::logging::ARG_VERBOSITY)
            .copied()
            .unwrap_or(0),
    );

    telemetry::init(verbosity_level, commands::logging::log_format(&matches))?;

    if let Some(path) = config {
        info!("Loaded settings from {}", path.display());
    }

    dispatch::handler(&matches)
}
