pub mod gateway;
pub mod logging;
pub mod login;
pub mod service;
pub mod two_fa;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};
use std::path::PathBuf;

pub const ARG_CONFIG: &str = "config";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("gatekeep")
        .about("Keeps a trading gateway web session authenticated")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_CONFIG)
                .short('c')
                .long(ARG_CONFIG)
                .help("YAML file with settings; environment variables take precedence")
                .env("GATEKEEP_CONFIG")
                .value_parser(clap::value_parser!(PathBuf)),
        );

    let command = login::with_args(command);
    let command = two_fa::with_args(command);
    let command = gateway::with_args(command);
    let command = service::with_args(command);
    logging::with_args(command)
}
