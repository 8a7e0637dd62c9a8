use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::{Resolution, TwoFaError};

/// Acknowledgment delivered through the health service.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Acknowledgment {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// No challenge is waiting for an acknowledgment.
    NotAwaiting,
    /// An acknowledgment was already delivered and not yet consumed.
    AlreadyPending,
}

/// Hands acknowledgments from the HTTP surface to a waiting 2FA resolution.
#[derive(Clone, Debug)]
pub struct AckMailbox {
    tx: mpsc::Sender<Acknowledgment>,
    rx: Arc<Mutex<mpsc::Receiver<Acknowledgment>>>,
    awaiting: Arc<AtomicBool>,
}

impl Default for AckMailbox {
    fn default() -> Self {
        Self::new()
    }
}

struct AwaitingGuard<'a>(&'a AtomicBool);

impl Drop for AwaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AckMailbox {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            awaiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a 2FA challenge is currently blocked on an acknowledgment.
    #[must_use]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }

    pub fn deliver(&self, ack: Acknowledgment) -> Delivery {
        if !self.is_awaiting() {
            return Delivery::NotAwaiting;
        }

        match self.tx.try_send(ack) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::AlreadyPending,
        }
    }

    pub(super) async fn receive(&self) -> Result<Resolution, TwoFaError> {
        let mut rx = self.rx.lock().await;

        // anything left over belongs to an earlier challenge
        while rx.try_recv().is_ok() {
            debug!("Discarded stale 2FA acknowledgment");
        }

        self.awaiting.store(true, Ordering::SeqCst);
        let _guard = AwaitingGuard(&self.awaiting);

        info!("Waiting for a 2FA acknowledgment");

        match rx.recv().await {
            Some(Acknowledgment { code: Some(code) }) => Ok(Resolution::Code(code.trim().to_string())),
            Some(Acknowledgment { code: None }) => Ok(Resolution::Ack),
            None => Err(TwoFaError::Unavailable(
                "acknowledgment channel closed".to_string(),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn deliver_without_challenge_is_rejected() {
        let mailbox = AckMailbox::new();
        assert_eq!(
            mailbox.deliver(Acknowledgment::default()),
            Delivery::NotAwaiting
        );
        assert!(!mailbox.is_awaiting());
    }

    #[tokio::test]
    async fn delivers_code_to_waiting_challenge() {
        let mailbox = AckMailbox::new();
        let waiter = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.receive().await })
        };

        while !mailbox.is_awaiting() {
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(
            mailbox.deliver(Acknowledgment {
                code: Some(" 123456 ".to_string())
            }),
            Delivery::Accepted
        );
        assert_eq!(
            mailbox.deliver(Acknowledgment::default()),
            Delivery::AlreadyPending
        );

        let resolution = waiter.await.unwrap().unwrap();
        assert_eq!(resolution, Resolution::Code("123456".to_string()));
        assert!(!mailbox.is_awaiting());
    }

    #[tokio::test]
    async fn cancelled_wait_clears_awaiting() {
        let mailbox = AckMailbox::new();
        let result = tokio::time::timeout(Duration::from_millis(20), mailbox.receive()).await;
        assert!(result.is_err());
        assert!(!mailbox.is_awaiting());
    }
}
