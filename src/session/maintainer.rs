use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex, OwnedMutexGuard, RwLock},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};

use super::state::{Budget, Event, HealthSnapshot, Ledger, SessionState};
use crate::{
    auth::{AuthResult, Authenticator},
    gateway::GatewayProbe,
};

#[derive(Clone, Copy, Debug)]
pub struct MaintainerConfig {
    interval: Duration,
    max_failed_auth: u32,
    max_transient_failures: u32,
    start_active: bool,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintainerConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_failed_auth: 5,
            max_transient_failures: 0,
            start_active: true,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_max_failed_auth(mut self, max: u32) -> Self {
        self.max_failed_auth = max;
        self
    }

    #[must_use]
    pub const fn with_max_transient_failures(mut self, max: u32) -> Self {
        self.max_transient_failures = max;
        self
    }

    #[must_use]
    pub const fn with_start_active(mut self, active: bool) -> Self {
        self.start_active = active;
        self
    }

    const fn budget(&self) -> Budget {
        Budget {
            max_failed_auth: self.max_failed_auth,
            max_transient_failures: self.max_transient_failures,
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The loop is paused.
    Inactive,
    /// The failure budget is spent.
    LockedOut,
    /// A login attempt was already in flight.
    Skipped,
    /// The session is still valid.
    Confirmed,
    /// Tickle or validate failed without a verdict.
    Transient,
    Attempted(AuthResult),
}

enum Check {
    Valid,
    Invalid,
    Transient,
}

struct Inner {
    ledger: RwLock<Ledger>,
    login_guard: Arc<Mutex<()>>,
    active: watch::Sender<bool>,
    authenticator: Arc<dyn Authenticator>,
    gateway: Arc<dyn GatewayProbe>,
    config: MaintainerConfig,
}

/// Owns the session state and keeps the gateway session alive.
///
/// Cloning is cheap; every clone drives the same session.
#[derive(Clone)]
pub struct SessionMaintainer {
    inner: Arc<Inner>,
}

impl SessionMaintainer {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        gateway: Arc<dyn GatewayProbe>,
        config: MaintainerConfig,
    ) -> Self {
        let (active, _) = watch::channel(config.start_active);
        Self {
            inner: Arc::new(Inner {
                ledger: RwLock::new(Ledger::new(config.budget(), config.start_active)),
                login_guard: Arc::new(Mutex::new(())),
                active,
                authenticator,
                gateway,
                config,
            }),
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.ledger.read().await.snapshot()
    }

    /// Resume ticking. Returns whether the loop was paused.
    pub async fn activate(&self) -> bool {
        let mut ledger = self.inner.ledger.write().await;
        let changed = ledger.set_active(true);
        self.inner.active.send_replace(true);
        if changed {
            info!("Maintenance activated");
        }
        changed
    }

    /// Stop scheduling ticks. An attempt already in flight still completes and applies.
    pub async fn deactivate(&self) -> bool {
        let mut ledger = self.inner.ledger.write().await;
        let changed = ledger.set_active(false);
        self.inner.active.send_replace(false);
        if changed {
            info!("Maintenance deactivated");
        }
        changed
    }

    /// One maintenance step.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickOutcome {
        {
            let ledger = self.inner.ledger.read().await;
            if !ledger.active() {
                return TickOutcome::Inactive;
            }
            if ledger.session().state == SessionState::LockedOut {
                warn!("Locked out after {} failed logins, not attempting", ledger.session().failures);
                return TickOutcome::LockedOut;
            }
        }

        let Ok(guard) = self.inner.login_guard.clone().try_lock_owned() else {
            info!("Authentication in progress, skipping tick");
            return TickOutcome::Skipped;
        };

        let state = {
            let ledger = self.inner.ledger.read().await;
            if !ledger.active() {
                return TickOutcome::Inactive;
            }
            ledger.session().state
        };

        match state {
            SessionState::LockedOut => return TickOutcome::LockedOut,
            SessionState::Authenticated => match self.check().await {
                Check::Valid => {
                    self.inner.ledger.write().await.apply(Event::SessionConfirmed);
                    debug!("Gateway session is valid");
                    return TickOutcome::Confirmed;
                }
                Check::Transient => {
                    let session = self
                        .inner
                        .ledger
                        .write()
                        .await
                        .apply(Event::TransientFailure);
                    if session.state != SessionState::Authenticated {
                        warn!(
                            "{} consecutive transient failures counted as a failed login ({}/{})",
                            self.inner.config.max_transient_failures,
                            session.failures,
                            self.inner.config.max_failed_auth
                        );
                    }
                    return TickOutcome::Transient;
                }
                Check::Invalid => warn!("Gateway session is no longer authenticated"),
            },
            _ => {}
        }

        // deactivate may have landed while the gateway was being checked
        if !self.inner.ledger.read().await.active() {
            info!("Maintenance deactivated during the check, not authenticating");
            return TickOutcome::Inactive;
        }

        TickOutcome::Attempted(self.login(guard).await)
    }

    /// Operator-triggered authentication.
    ///
    /// Activates the loop, clears a lockout and the failure counter, and starts one attempt in
    /// the background. Returns `false` without doing anything if an attempt is in flight.
    pub async fn spawn_authenticate(&self) -> bool {
        let Ok(guard) = self.inner.login_guard.clone().try_lock_owned() else {
            return false;
        };

        {
            let mut ledger = self.inner.ledger.write().await;
            if ledger.set_active(true) {
                info!("Maintenance activated for manual authentication");
            }
            self.inner.active.send_replace(true);
            if ledger.session().state != SessionState::Authenticated {
                ledger.apply(Event::Reset);
            }
        }

        let maintainer = self.clone();
        tokio::spawn(async move {
            let result = maintainer.login(guard).await;
            debug!(?result, "Manual authentication finished");
        });

        true
    }

    async fn check(&self) -> Check {
        match self.inner.gateway.tickle().await {
            Ok(status) => {
                debug!(?status, "Tickle succeeded");
                self.inner.ledger.write().await.observe_gateway(status);
            }
            Err(e) => {
                warn!("Tickle failed: {e:#}");
                return Check::Transient;
            }
        }

        match self.inner.gateway.validate().await {
            Ok(true) => Check::Valid,
            Ok(false) => Check::Invalid,
            Err(e) => {
                warn!("Validate failed: {e:#}");
                Check::Transient
            }
        }
    }

    /// Run one login attempt and apply its result. `_guard` proves no other attempt runs.
    async fn login(&self, _guard: OwnedMutexGuard<()>) -> AuthResult {
        self.inner.ledger.write().await.begin_attempt();
        info!("Authenticating");

        let result = self.inner.authenticator.attempt_login().await;

        let mut ledger = self.inner.ledger.write().await;
        let attempt = ledger.record(&result);
        let session = ledger.session();

        match (&result, session.state) {
            (AuthResult::Success, _) => info!("Authentication #{} succeeded", attempt.sequence),
            (AuthResult::Failure(reason), SessionState::LockedOut) => error!(
                "Authentication #{} failed: {reason}. Reached {} failed logins; automatic login is suspended to avoid an account lock-out. Authenticate manually or restart to resume",
                attempt.sequence, session.failures
            ),
            (AuthResult::Failure(reason), _) => warn!(
                "Authentication #{} failed: {reason} ({}/{})",
                attempt.sequence, session.failures, self.inner.config.max_failed_auth
            ),
        }

        result
    }

    /// Spawn the maintenance loop. It ticks every interval while active, parks while
    /// inactive, and returns once `shutdown` flips to `true`.
    #[must_use]
    pub fn spawn(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let maintainer = self.clone();
        let mut active = self.inner.active.subscribe();
        let period = self.inner.config.interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Maintenance every {} seconds", period.as_secs());

            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }

                if !*active.borrow_and_update() {
                    debug!("Maintenance paused");
                    tokio::select! {
                        changed = active.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            ticker.reset_immediately();
                        }
                        _ = shutdown.changed() => break,
                    }
                    continue;
                }

                tokio::select! {
                    _ = ticker.tick() => {
                        let maintainer = maintainer.clone();
                        tokio::spawn(async move {
                            let outcome = maintainer.tick().await;
                            debug!(?outcome, "Tick finished");
                        });
                    }
                    changed = active.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            info!("Maintenance stopped");
        })
    }
}
