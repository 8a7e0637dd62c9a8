use std::time::Duration;

use tracing::{info, warn};

use super::{Resolution, TwoFaError};
use crate::browser::{wait_for_any, Browser, Condition, Target, TargetKind};

#[derive(Clone, Debug)]
pub struct PushSettings {
    success: Target,
    resend: Target,
    retries: u32,
    interval: Duration,
}

impl PushSettings {
    #[must_use]
    pub fn new(success: Target) -> Self {
        Self {
            success,
            resend: Target::new(
                TargetKind::CssSelector,
                "a[onclick*='resendNotification()']",
            ),
            retries: 10,
            interval: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_resend(mut self, resend: Target) -> Self {
        self.resend = resend;
        self
    }

    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Wait for the operator to approve the push notification, resending it every interval.
pub(super) async fn await_approval(
    page: &dyn Browser,
    settings: &PushSettings,
) -> Result<Resolution, TwoFaError> {
    for attempt in 0..=settings.retries {
        if attempt > 0 {
            resend(page, &settings.resend).await?;
            info!(
                "Push notification resent ({attempt}/{})",
                settings.retries
            );
        }

        let approved = wait_for_any(
            page,
            &[((), &settings.success, Condition::HasText)],
            settings.interval,
        )
        .await
        .map_err(|e| TwoFaError::Unavailable(format!("{e:#}")))?;

        if approved.is_some() {
            info!("Push notification approved");
            return Ok(Resolution::Ack);
        }
    }

    Err(TwoFaError::Unavailable(format!(
        "push notification not approved after {} resends",
        settings.retries
    )))
}

async fn resend(page: &dyn Browser, target: &Target) -> Result<(), TwoFaError> {
    let unavailable = |e: anyhow::Error| TwoFaError::Unavailable(format!("{e:#}"));

    for element in page.locate(&target.css()).await.map_err(unavailable)? {
        if page.is_visible(&element).await.map_err(unavailable)? {
            return page.click(&element).await.map_err(unavailable);
        }
    }

    warn!("Resend control {target} not found");
    Err(TwoFaError::Unavailable(format!(
        "resend control {target} not found"
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, FakeElement, Scene};

    const RESEND_CSS: &str = "a[onclick*='resendNotification()']";

    fn settings() -> PushSettings {
        PushSettings::new(Target::new(TargetKind::TagName, "Client login succeeds"))
            .with_retries(2)
            .with_interval(Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn approved_after_one_resend() {
        let page = FakeBrowser::new(
            Scene::new("Check your phone").with(FakeElement::new("resend", RESEND_CSS)),
        )
        .on_click("resend", Scene::new("Client login succeeds"));

        let resolution = await_approval(&page, &settings()).await.unwrap();

        assert_eq!(resolution, Resolution::Ack);
        assert_eq!(page.actions(), vec!["click resend".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries() {
        let page = FakeBrowser::new(
            Scene::new("Check your phone").with(FakeElement::new("resend", RESEND_CSS)),
        );

        let err = await_approval(&page, &settings()).await.unwrap_err();

        assert!(matches!(err, TwoFaError::Unavailable(_)));
        assert_eq!(page.actions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_resend_control() {
        let page = FakeBrowser::new(Scene::new("Check your phone"));

        let err = await_approval(&page, &settings()).await.unwrap_err();

        assert!(err.to_string().contains("resend control"));
    }
}
