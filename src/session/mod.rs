//! Session state machine and maintenance loop.

pub mod maintainer;
pub mod state;

pub use maintainer::{MaintainerConfig, SessionMaintainer, TickOutcome};
pub use state::{transition, AuthAttempt, Budget, Event, HealthSnapshot, Session, SessionState};
