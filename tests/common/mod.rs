#![allow(dead_code, clippy::unwrap_used)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Result;
use async_trait::async_trait;
use gatekeep::{
    auth::{AuthResult, Authenticator, FailureReason},
    gateway::{GatewayProbe, GatewayStatus},
    session::{MaintainerConfig, SessionMaintainer},
};
use tokio::sync::Notify;

/// Gateway whose session validity is flipped by the test.
#[derive(Default)]
pub struct Gateway {
    pub authenticated: AtomicBool,
    pub tickles: AtomicUsize,
}

impl Gateway {
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn tickles(&self) -> usize {
        self.tickles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayProbe for Gateway {
    async fn ping(&self) -> bool {
        true
    }

    async fn tickle(&self) -> Result<GatewayStatus> {
        self.tickles.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayStatus {
            session: true,
            connected: true,
            authenticated: self.authenticated.load(Ordering::SeqCst),
            ..GatewayStatus::default()
        })
    }

    async fn validate(&self) -> Result<bool> {
        Ok(self.authenticated.load(Ordering::SeqCst))
    }
}

/// Pops scripted results, then repeats the last one. A success marks the gateway authenticated.
pub struct Login {
    results: Mutex<VecDeque<AuthResult>>,
    gateway: Arc<Gateway>,
    calls: AtomicUsize,
}

impl Login {
    pub fn new(gateway: Arc<Gateway>, results: Vec<AuthResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            gateway,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for Login {
    async fn attempt_login(&self) -> AuthResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front()
            } else {
                results.front().cloned()
            }
        }
        .unwrap_or(AuthResult::Failure(FailureReason::PageLoadTimeout));

        if result.is_success() {
            self.gateway.set_authenticated(true);
        }
        result
    }
}

/// Blocks inside `attempt_login` until released.
#[derive(Default)]
pub struct Gated {
    pub started: Notify,
    pub release: Notify,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Authenticator for Gated {
    async fn attempt_login(&self) -> AuthResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        AuthResult::Success
    }
}

pub fn failure() -> AuthResult {
    AuthResult::Failure(FailureReason::LoginRejected(
        "Invalid username password combination".to_string(),
    ))
}

pub fn maintainer(
    authenticator: Arc<dyn Authenticator>,
    gateway: Arc<Gateway>,
    config: MaintainerConfig,
) -> SessionMaintainer {
    SessionMaintainer::new(authenticator, gateway, config)
}
