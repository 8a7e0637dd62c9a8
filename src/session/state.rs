//! Session state machine and the ledger the maintainer guards with its lock.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    auth::{AuthResult, FailureReason},
    gateway::GatewayStatus,
};

const HISTORY_LIMIT: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Degraded,
    LockedOut,
}

impl SessionState {
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Failed-login budget.
///
/// `max_failed_auth = 0` disables the lockout. `max_transient_failures = 0` never
/// escalates transient errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Budget {
    pub max_failed_auth: u32,
    pub max_transient_failures: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub state: SessionState,
    pub failures: u32,
    pub transient_failures: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A login attempt begins.
    LoginStarted,
    LoginSucceeded,
    LoginFailed,
    /// A tick found the session valid.
    SessionConfirmed,
    /// Tickle or validate could not reach a verdict.
    TransientFailure,
    /// Operator intervention.
    Reset,
}

fn charge(session: Session, budget: Budget) -> Session {
    let failures = session.failures.saturating_add(1);
    let state = if budget.max_failed_auth > 0 && failures >= budget.max_failed_auth {
        SessionState::LockedOut
    } else {
        SessionState::Degraded
    };

    Session {
        state,
        failures,
        transient_failures: 0,
    }
}

/// Next session value. `LockedOut` only leaves on [`Event::Reset`].
#[must_use]
pub fn transition(session: Session, event: Event, budget: Budget) -> Session {
    if session.state == SessionState::LockedOut && event != Event::Reset {
        return session;
    }

    match event {
        Event::Reset => Session::default(),
        Event::LoginStarted => Session {
            state: SessionState::Authenticating,
            ..session
        },
        Event::LoginSucceeded => Session {
            state: SessionState::Authenticated,
            failures: 0,
            transient_failures: 0,
        },
        Event::LoginFailed => charge(session, budget),
        Event::SessionConfirmed => Session {
            transient_failures: 0,
            ..session
        },
        Event::TransientFailure => {
            let transient_failures = session.transient_failures.saturating_add(1);
            if budget.max_transient_failures > 0
                && transient_failures >= budget.max_transient_failures
            {
                charge(session, budget)
            } else {
                Session {
                    transient_failures,
                    ..session
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthAttempt {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub success: bool,
    pub reason: Option<FailureReason>,
}

/// Immutable view handed to the health service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub state: SessionState,
    pub ready: bool,
    pub active: bool,
    pub authenticating: bool,
    pub failures: u32,
    pub max_failed_auth: u32,
    pub transient_failures: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_attempt: Option<AuthAttempt>,
    pub recent_attempts: Vec<AuthAttempt>,
    /// Last successful tickle, as the gateway reported it.
    pub gateway: Option<GatewayStatus>,
}

/// Everything the maintainer's lock protects.
#[derive(Debug)]
pub struct Ledger {
    session: Session,
    budget: Budget,
    active: bool,
    authenticating: bool,
    next_sequence: u64,
    history: VecDeque<AuthAttempt>,
    gateway: Option<GatewayStatus>,
}

impl Ledger {
    #[must_use]
    pub fn new(budget: Budget, active: bool) -> Self {
        Self {
            session: Session::default(),
            budget,
            active,
            authenticating: false,
            next_sequence: 1,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            gateway: None,
        }
    }

    #[must_use]
    pub const fn session(&self) -> Session {
        self.session
    }

    #[must_use]
    pub const fn active(&self) -> bool {
        self.active
    }

    /// Returns whether the flag changed.
    pub fn set_active(&mut self, active: bool) -> bool {
        let changed = self.active != active;
        self.active = active;
        changed
    }

    pub fn apply(&mut self, event: Event) -> Session {
        self.session = transition(self.session, event, self.budget);
        self.session
    }

    pub fn observe_gateway(&mut self, status: GatewayStatus) {
        self.gateway = Some(status);
    }

    pub fn begin_attempt(&mut self) -> Session {
        self.authenticating = true;
        self.apply(Event::LoginStarted)
    }

    /// Apply a finished login attempt and remember it.
    pub fn record(&mut self, result: &AuthResult) -> AuthAttempt {
        self.authenticating = false;

        let attempt = AuthAttempt {
            sequence: self.next_sequence,
            at: Utc::now(),
            success: result.is_success(),
            reason: match result {
                AuthResult::Success => None,
                AuthResult::Failure(reason) => Some(reason.clone()),
            },
        };
        self.next_sequence += 1;

        self.apply(if attempt.success {
            Event::LoginSucceeded
        } else {
            Event::LoginFailed
        });

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(attempt.clone());

        attempt
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let last_attempt = self.history.back().cloned();
        HealthSnapshot {
            state: self.session.state,
            ready: self.session.state.is_ready(),
            active: self.active,
            authenticating: self.authenticating,
            failures: self.session.failures,
            max_failed_auth: self.budget.max_failed_auth,
            transient_failures: self.session.transient_failures,
            last_attempt_at: last_attempt.as_ref().map(|attempt| attempt.at),
            last_attempt,
            recent_attempts: self.history.iter().rev().cloned().collect(),
            gateway: self.gateway.clone(),
        }
    }
}
