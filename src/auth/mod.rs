//! One complete login transaction against the gateway's web login page.

pub mod screenshot;

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    browser::{
        targets::POLL_INTERVAL, wait_for_any, Browser, BrowserFactory, Condition, ElementRef,
        Step, Targets, Trigger,
    },
    gateway::GatewayProbe,
    two_fa::{Device, Resolution, StrategyKind, TwoFaError, TwoFactorChallenge, TwoFactorResolver},
};

/// Shown by the login page when the credentials are wrong or were submitted too early.
pub const INVALID_CREDENTIALS_TEXT: &str = "Invalid username password combination";

/// Shown when a paper trading user logs in with the live account toggle.
pub const PAPER_USER_IN_LIVE_MODE_TEXT: &str = "You have selected the Live Account Mode, but the specified user is a Paper Trading user. Please select the correct Login mode.";

const PRESUBMIT_BUFFER_STEP: Duration = Duration::from_secs(5);

const TOGGLE_SETTLE: Duration = Duration::from_secs(2);

const TWO_FA_SETTLE: Duration = Duration::from_secs(1);

/// Why a login transaction failed. Every variant counts against the failure budget.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("gateway did not accept connections in time")]
    GatewayNotReady,
    #[error("login page did not reach the expected state in time")]
    PageLoadTimeout,
    #[error("more than one visible, enabled element matched a login control")]
    AmbiguousControl,
    #[error("gateway did not confirm the session after login")]
    ValidationMismatch,
    #[error("2FA was not resolved in time")]
    TwoFaTimeout,
    #[error("the login page rejected the 2FA code")]
    TwoFaRejected,
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("2FA unavailable: {0}")]
    TwoFaUnavailable(String),
    #[error("browser error: {0}")]
    Browser(String),
}

impl FailureReason {
    #[must_use]
    pub const fn slug(&self) -> &'static str {
        match self {
            Self::GatewayNotReady => "gateway_not_ready",
            Self::PageLoadTimeout => "page_load_timeout",
            Self::AmbiguousControl => "ambiguous_control",
            Self::ValidationMismatch => "validation_mismatch",
            Self::TwoFaTimeout => "two_fa_timeout",
            Self::TwoFaRejected => "two_fa_rejected",
            Self::LoginRejected(_) => "login_rejected",
            Self::TwoFaUnavailable(_) => "two_fa_unavailable",
            Self::Browser(_) => "browser",
        }
    }
}

impl From<TwoFaError> for FailureReason {
    fn from(e: TwoFaError) -> Self {
        match e {
            TwoFaError::Timeout(_) => Self::TwoFaTimeout,
            other => Self::TwoFaUnavailable(other.to_string()),
        }
    }
}

fn browser_failure(e: anyhow::Error) -> FailureReason {
    FailureReason::Browser(format!("{e:#}"))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthResult {
    Success,
    Failure(FailureReason),
}

impl AuthResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Performs one login transaction. Never panics, never returns early without a result.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn attempt_login(&self) -> AuthResult;
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub account: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: SecretString) -> Self {
        Self {
            account: account.into(),
            password,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoginConfig {
    login_url: String,
    startup_timeout: Duration,
    startup_poll_interval: Duration,
    page_load_timeout: Duration,
    step_timeout: Duration,
    validate_timeout: Duration,
    min_presubmit_buffer: Duration,
    max_presubmit_buffer: Duration,
    use_paper_account: bool,
    two_fa_attempts: u32,
    error_screenshots: bool,
    outputs_dir: PathBuf,
    targets: Targets,
}

impl LoginConfig {
    pub fn new(login_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            startup_timeout: Duration::from_secs(300),
            startup_poll_interval: Duration::from_secs(2),
            page_load_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(15),
            validate_timeout: Duration::from_secs(10),
            min_presubmit_buffer: Duration::from_secs(5),
            max_presubmit_buffer: Duration::from_secs(30),
            use_paper_account: false,
            two_fa_attempts: 1,
            error_screenshots: false,
            outputs_dir: PathBuf::from("outputs"),
            targets: Targets::default(),
        }
    }

    #[must_use]
    pub const fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_startup_poll_interval(mut self, interval: Duration) -> Self {
        self.startup_poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    /// Pause between filling credentials and submitting. `max` is raised to `min` if lower.
    #[must_use]
    pub fn with_presubmit_buffer(mut self, min: Duration, max: Duration) -> Self {
        self.min_presubmit_buffer = min;
        self.max_presubmit_buffer = max.max(min);
        self
    }

    #[must_use]
    pub const fn with_paper_account(mut self, paper: bool) -> Self {
        self.use_paper_account = paper;
        self
    }

    /// Codes to try on one page when the login page rejects a 2FA code. At least one.
    #[must_use]
    pub fn with_two_fa_attempts(mut self, attempts: u32) -> Self {
        self.two_fa_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_error_screenshots(mut self, enabled: bool, outputs_dir: PathBuf) -> Self {
        self.error_screenshots = enabled;
        self.outputs_dir = outputs_dir;
        self
    }

    #[must_use]
    pub fn with_targets(mut self, targets: Targets) -> Self {
        self.targets = targets;
        self
    }

    #[must_use]
    pub fn targets(&self) -> &Targets {
        &self.targets
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Drives the login page through a [`Browser`] and confirms the result with the gateway.
pub struct LoginDriver {
    credentials: Credentials,
    gateway: Arc<dyn GatewayProbe>,
    browsers: Arc<dyn BrowserFactory>,
    resolver: TwoFactorResolver,
    config: LoginConfig,
    presubmit_buffer_ms: AtomicU64,
}

impl LoginDriver {
    #[must_use]
    pub fn new(
        credentials: Credentials,
        gateway: Arc<dyn GatewayProbe>,
        browsers: Arc<dyn BrowserFactory>,
        resolver: TwoFactorResolver,
        config: LoginConfig,
    ) -> Self {
        let presubmit_buffer_ms = AtomicU64::new(duration_millis(config.min_presubmit_buffer));
        Self {
            credentials,
            gateway,
            browsers,
            resolver,
            config,
            presubmit_buffer_ms,
        }
    }

    #[must_use]
    pub fn presubmit_buffer(&self) -> Duration {
        Duration::from_millis(self.presubmit_buffer_ms.load(Ordering::SeqCst))
    }

    fn grow_presubmit_buffer(&self) {
        let grown = (self.presubmit_buffer() + PRESUBMIT_BUFFER_STEP)
            .min(self.config.max_presubmit_buffer);
        self.presubmit_buffer_ms
            .store(duration_millis(grown), Ordering::SeqCst);
        warn!("Presubmit buffer increased to {}s", grown.as_secs_f32());
    }

    fn reset_presubmit_buffer(&self) {
        self.presubmit_buffer_ms.store(
            duration_millis(self.config.min_presubmit_buffer),
            Ordering::SeqCst,
        );
    }

    async fn wait_for_gateway(&self) -> bool {
        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.gateway.ping().await {
                return true;
            }

            if Instant::now() >= deadline {
                error!(
                    "Gateway did not respond within {} seconds",
                    self.config.startup_timeout.as_secs()
                );
                return false;
            }

            debug!("Gateway not ready yet");
            sleep(self.config.startup_poll_interval).await;
        }
    }

    async fn confirm(&self) -> AuthResult {
        let deadline = Instant::now() + self.config.validate_timeout;
        loop {
            match self.gateway.validate().await {
                Ok(true) => {
                    info!("Gateway confirmed the session");
                    return AuthResult::Success;
                }
                Ok(false) => debug!("Gateway does not report the session yet"),
                Err(e) => debug!("Validate failed: {e:#}"),
            }

            if Instant::now() >= deadline {
                warn!("Login page reported success but the gateway did not confirm it");
                return AuthResult::Failure(FailureReason::ValidationMismatch);
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait(
        &self,
        page: &dyn Browser,
        wanted: &[(Step, Condition)],
        timeout: Duration,
    ) -> Result<Trigger<Step>, FailureReason> {
        let targets = &self.config.targets;
        let wanted: Vec<_> = wanted
            .iter()
            .map(|&(step, condition)| (step, targets.get(step), condition))
            .collect();

        wait_for_any(page, &wanted, timeout)
            .await
            .map_err(browser_failure)?
            .ok_or_else(|| {
                let steps: Vec<_> = wanted.iter().map(|(step, _, _)| step).collect();
                warn!("Timed out after {}s waiting for {steps:?}", timeout.as_secs());
                FailureReason::PageLoadTimeout
            })
    }

    /// The single visible, enabled element for `step`.
    ///
    /// Waits up to the step timeout for one to appear and refuses to guess between several.
    async fn control(&self, page: &dyn Browser, step: Step) -> Result<ElementRef, FailureReason> {
        let target = self.config.targets.get(step);
        let deadline = Instant::now() + self.config.step_timeout;

        loop {
            let mut usable = Vec::new();
            for element in page.locate(&target.css()).await.map_err(browser_failure)? {
                if page.is_visible(&element).await.map_err(browser_failure)?
                    && page.is_enabled(&element).await.map_err(browser_failure)?
                {
                    usable.push(element);
                }
            }

            if usable.len() > 1 {
                error!(
                    "{} visible, enabled elements match {target} for {step:?}; not submitting",
                    usable.len()
                );
                return Err(FailureReason::AmbiguousControl);
            }

            if let Some(element) = usable.pop() {
                return Ok(element);
            }

            if Instant::now() >= deadline {
                warn!("No visible, enabled element matches {target} for {step:?}");
                return Err(FailureReason::PageLoadTimeout);
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn toggle_paper(&self, page: &dyn Browser) -> Result<(), FailureReason> {
        let toggle = self.control(page, Step::PaperToggle).await?;
        page.click(&toggle).await.map_err(browser_failure)?;
        info!("Switched the login form to the paper account");
        sleep(TOGGLE_SETTLE).await;
        Ok(())
    }

    async fn submit_credentials(&self, page: &dyn Browser) -> Result<(), FailureReason> {
        let user_name = self.control(page, Step::UserName).await?;
        let password = self.control(page, Step::Password).await?;
        let submit = self.control(page, Step::Submit).await?;

        page.fill(&user_name, &self.credentials.account)
            .await
            .map_err(browser_failure)?;
        page.fill(&password, self.credentials.password.expose_secret())
            .await
            .map_err(browser_failure)?;

        let buffer = self.presubmit_buffer();
        if !buffer.is_zero() {
            debug!("Waiting {}s before submitting", buffer.as_secs_f32());
            sleep(buffer).await;
        }

        info!("Submitting credentials for {}", self.credentials.account);
        page.click(&submit).await.map_err(browser_failure)
    }

    async fn after_submit(&self, page: &dyn Browser) -> Result<Trigger<Step>, FailureReason> {
        self.wait(
            page,
            &[
                (Step::Success, Condition::HasText),
                (Step::TwoFa, Condition::Visible),
                (Step::TwoFaSelect, Condition::Visible),
                (Step::TwoFaNotification, Condition::Visible),
                (Step::Error, Condition::Visible),
                (Step::KeyPromo, Condition::Clickable),
            ],
            self.config.step_timeout,
        )
        .await
    }

    async fn after_two_fa(
        &self,
        page: &dyn Browser,
        timeout: Duration,
    ) -> Result<Trigger<Step>, FailureReason> {
        self.wait(
            page,
            &[
                (Step::Success, Condition::HasText),
                (Step::Error, Condition::Visible),
                (Step::KeyPromo, Condition::Clickable),
            ],
            timeout,
        )
        .await
    }

    /// Like `after_two_fa`, but the code prompt coming back means the code was rejected.
    async fn after_code(&self, page: &dyn Browser) -> Result<Trigger<Step>, FailureReason> {
        self.wait(
            page,
            &[
                (Step::Success, Condition::HasText),
                (Step::Error, Condition::Visible),
                (Step::KeyPromo, Condition::Clickable),
                (Step::TwoFa, Condition::Visible),
            ],
            self.config.step_timeout,
        )
        .await
    }

    /// Choose a device from the 2FA device list and wait for the next prompt.
    ///
    /// Returns the listed devices with the trigger so the challenge can carry them.
    async fn choose_device(
        &self,
        page: &dyn Browser,
    ) -> Result<(Trigger<Step>, Vec<Device>), FailureReason> {
        let select = self.config.targets.get(Step::TwoFaSelect);
        let options = page
            .locate(&format!("{} option", select.css()))
            .await
            .map_err(browser_failure)?;

        let mut devices = Vec::with_capacity(options.len());
        let mut elements = Vec::with_capacity(options.len());
        for option in options {
            let name = page.text(&option).await.map_err(browser_failure)?;
            let identifier = page
                .attribute(&option, "value")
                .await
                .map_err(browser_failure)?
                .unwrap_or_default();
            devices.push(Device::new(name.trim(), identifier));
            elements.push(option);
        }

        let device = self.resolver.select_device(&devices).ok_or_else(|| {
            FailureReason::TwoFaUnavailable("the login page listed no 2FA devices".to_string())
        })?;

        let position = devices
            .iter()
            .position(|candidate| candidate == device)
            .unwrap_or_default();

        if let Some(option) = elements.get(position) {
            info!("Selecting 2FA device {}", device.name);
            page.click(option).await.map_err(browser_failure)?;
        }

        let trigger = self
            .wait(
                page,
                &[
                    (Step::Success, Condition::HasText),
                    (Step::TwoFa, Condition::Visible),
                    (Step::TwoFaNotification, Condition::Visible),
                    (Step::Error, Condition::Visible),
                    (Step::KeyPromo, Condition::Clickable),
                ],
                self.config.step_timeout,
            )
            .await?;

        Ok((trigger, devices))
    }

    /// The page waits for a push approval on the operator's device.
    async fn await_notification(
        &self,
        page: &dyn Browser,
        devices: Vec<Device>,
    ) -> Result<Trigger<Step>, FailureReason> {
        let two_fa_timeout = self.resolver.config().timeout();

        match self.resolver.kind() {
            StrategyKind::Totp => {
                info!("Waiting for the push notification to be approved");
                self.after_two_fa(page, two_fa_timeout).await
            }
            strategy => {
                info!("Push notification challenge, resolving with {strategy}");
                self.resolver
                    .resolve(TwoFactorChallenge::new(strategy).with_devices(devices), page)
                    .await?;
                self.after_two_fa(page, self.config.step_timeout).await
            }
        }
    }

    /// The page asks for a one-time code. A rejected code is retried up to `two_fa_attempts`.
    async fn enter_code(
        &self,
        page: &dyn Browser,
        devices: &[Device],
    ) -> Result<Trigger<Step>, FailureReason> {
        let attempts = self.config.two_fa_attempts.max(1);

        for attempt in 1..=attempts {
            info!("2FA code requested ({attempt}/{attempts})");

            let challenge =
                TwoFactorChallenge::new(self.resolver.kind()).with_devices(devices.to_vec());
            let Resolution::Code(code) = self.resolver.resolve(challenge, page).await? else {
                return Err(FailureReason::TwoFaUnavailable(
                    "the login page needs a code but the strategy only acknowledged".to_string(),
                ));
            };

            let input = self.control(page, Step::TwoFaInput).await?;
            page.fill(&input, &code).await.map_err(browser_failure)?;
            page.submit(&input).await.map_err(browser_failure)?;
            info!("2FA code submitted");

            // the prompt stays up briefly while the form posts
            sleep(TWO_FA_SETTLE).await;

            let trigger = self.after_code(page).await?;
            if trigger.key != Step::TwoFa {
                return Ok(trigger);
            }
            warn!("The login page rejected the 2FA code ({attempt}/{attempts})");
        }

        Err(FailureReason::TwoFaRejected)
    }

    /// Everything between opening the page and the page reporting success.
    async fn drive(&self, page: &dyn Browser) -> Result<(), FailureReason> {
        info!("Loading the login page");
        page.navigate(&self.config.login_url)
            .await
            .map_err(browser_failure)?;

        self.wait(
            page,
            &[(Step::UserName, Condition::Clickable)],
            self.config.page_load_timeout,
        )
        .await?;
        debug!("Login page loaded");

        if self.config.use_paper_account {
            self.toggle_paper(page).await?;
        }

        self.submit_credentials(page).await?;
        let mut trigger = self.after_submit(page).await?;

        if trigger.key == Step::Error && trigger.text.contains(PAPER_USER_IN_LIVE_MODE_TEXT) {
            warn!("Paper trading user in live mode, switching to the paper account");
            self.toggle_paper(page).await?;
            self.submit_credentials(page).await?;
            trigger = self.after_submit(page).await?;
        }

        let mut devices = Vec::new();
        if trigger.key == Step::TwoFaSelect {
            (trigger, devices) = self.choose_device(page).await?;
        }

        trigger = match trigger.key {
            Step::TwoFaNotification => self.await_notification(page, devices).await?,
            Step::TwoFa => self.enter_code(page, &devices).await?,
            _ => trigger,
        };

        if trigger.key == Step::KeyPromo {
            if let Some(element) = &trigger.element {
                info!("Skipping the key promotion page");
                page.click(element).await.map_err(browser_failure)?;
            }
            trigger = self
                .wait(
                    page,
                    &[
                        (Step::Success, Condition::HasText),
                        (Step::Error, Condition::Visible),
                    ],
                    self.config.step_timeout,
                )
                .await?;
        }

        match trigger.key {
            Step::Success => {
                info!("Login page reports success");
                self.reset_presubmit_buffer();
                Ok(())
            }
            Step::Error => {
                let text = trigger.text.trim().to_string();
                error!("Login rejected: {text}");
                if text.contains(INVALID_CREDENTIALS_TEXT) {
                    self.grow_presubmit_buffer();
                }
                Err(FailureReason::LoginRejected(text))
            }
            other => Err(FailureReason::Browser(format!(
                "unexpected login page state {other:?}"
            ))),
        }
    }

    async fn capture(&self, page: &dyn Browser, reason: &FailureReason) {
        if !self.config.error_screenshots {
            return;
        }

        match screenshot::save(page, &self.config.outputs_dir, reason.slug()).await {
            Ok(path) => info!("Saved screenshot {}", path.display()),
            Err(e) => warn!("Could not save screenshot: {e:#}"),
        }
    }
}

#[async_trait]
impl Authenticator for LoginDriver {
    #[instrument(skip(self), fields(account = %self.credentials.account))]
    async fn attempt_login(&self) -> AuthResult {
        if !self.wait_for_gateway().await {
            return AuthResult::Failure(FailureReason::GatewayNotReady);
        }

        match self.gateway.validate().await {
            Ok(true) => {
                info!("Gateway session already authenticated");
                return AuthResult::Success;
            }
            Ok(false) => {}
            Err(e) => debug!("Validate before login failed: {e:#}"),
        }

        let page = match self.browsers.open().await {
            Ok(page) => page,
            Err(e) => {
                error!("Could not open a browser session: {e:#}");
                return AuthResult::Failure(browser_failure(e));
            }
        };

        let result = match self.drive(page.as_ref()).await {
            Ok(()) => self.confirm().await,
            Err(reason) => AuthResult::Failure(reason),
        };

        if let AuthResult::Failure(reason) = &result {
            self.capture(page.as_ref(), reason).await;
        }

        if let Err(e) = page.close().await {
            warn!("Could not close the browser session: {e:#}");
        }

        result
    }
}
