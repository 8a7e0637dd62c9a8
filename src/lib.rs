//! # gatekeep
//!
//! `gatekeep` keeps a locally running trading gateway's web session authenticated.
//! It logs in through the gateway's web login page, answers second-factor challenges,
//! and then keeps proving that the session is alive, logging in again whenever it lapses.
//!
//! ## Layout
//!
//! - [`two_fa`] resolves one second-factor challenge with the configured strategy.
//! - [`auth`] drives one complete login transaction through a [`browser::Browser`].
//! - [`session`] owns the session state machine and the maintenance loop, and enforces
//!   the failed-login budget that protects the account from a provider-side lockout.
//! - [`health`] serves liveness/readiness and the operator controls over HTTP.
//! - [`gateway`] and [`browser`] are the collaborators the engine talks to.
//!
//! ## Failure budget
//!
//! Only completed, unsuccessful login transactions count against the budget. Keep-alive
//! and transport errors are transient and retried on the next tick. Once the budget is
//! exhausted the session is `LockedOut` and no further logins are attempted until an
//! operator authenticates manually or the process restarts.

pub mod auth;
pub mod browser;
pub mod cli;
pub mod gateway;
pub mod health;
pub mod session;
pub mod two_fa;

#[cfg(test)]
pub(crate) mod testing;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
