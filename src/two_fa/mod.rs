//! Second-factor challenge resolution.
//!
//! One [`TwoFactorResolver`] is configured per process with a single [`TwoFaStrategy`]. The
//! login driver builds a [`TwoFactorChallenge`] when the login page asks for a second factor
//! and hands it over by value; the resolver answers with a code or a bare acknowledgment.

pub mod command;
pub mod external;
pub mod push;
pub mod totp;

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::browser::Browser;

pub use command::CommandTwoFa;
pub use external::{AckMailbox, Acknowledgment, Delivery};
pub use push::PushSettings;
pub use totp::TotpGenerator;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Totp,
    PushNotification,
    ExternalRequest,
    Custom,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::PushNotification => "push-notification",
            Self::ExternalRequest => "external-request",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "totp" => Ok(Self::Totp),
            "push-notification" | "push" => Ok(Self::PushNotification),
            "external-request" | "external" => Ok(Self::ExternalRequest),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown 2FA strategy: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub identifier: String,
}

impl Device {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    pub strategy: StrategyKind,
    pub devices: Vec<Device>,
    pub ack_token: Option<String>,
}

impl TwoFactorChallenge {
    #[must_use]
    pub const fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            devices: Vec::new(),
            ack_token: None,
        }
    }

    #[must_use]
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }
}

/// Pick the device named exactly `target`, else the first one listed.
#[must_use]
pub fn select_device<'a>(devices: &'a [Device], target: Option<&str>) -> Option<&'a Device> {
    target
        .and_then(|target| devices.iter().find(|device| device.name == target))
        .or_else(|| devices.first())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Code(String),
    Ack,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TwoFaError {
    #[error("2FA was not resolved within {0:?}")]
    Timeout(Duration),
    #[error("2FA code must be exactly six digits")]
    InvalidCode,
    #[error("2FA unavailable: {0}")]
    Unavailable(String),
}

/// Caller-supplied resolution logic.
#[async_trait]
pub trait CustomTwoFa: Send + Sync {
    async fn resolve(
        &self,
        challenge: &TwoFactorChallenge,
        device: Option<&Device>,
    ) -> Result<Resolution>;
}

#[derive(Clone)]
pub enum TwoFaStrategy {
    Totp(Arc<TotpGenerator>),
    PushNotification(PushSettings),
    ExternalRequest(AckMailbox),
    Custom(Arc<dyn CustomTwoFa>),
}

impl TwoFaStrategy {
    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        match self {
            Self::Totp(_) => StrategyKind::Totp,
            Self::PushNotification(_) => StrategyKind::PushNotification,
            Self::ExternalRequest(_) => StrategyKind::ExternalRequest,
            Self::Custom(_) => StrategyKind::Custom,
        }
    }
}

impl fmt::Debug for TwoFaStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TwoFaStrategy").field(&self.kind()).finish()
    }
}

#[derive(Clone, Debug)]
pub struct TwoFaConfig {
    timeout: Duration,
    select_target: Option<String>,
    strict_code: bool,
}

impl Default for TwoFaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TwoFaConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            select_target: None,
            strict_code: true,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_select_target(mut self, target: Option<String>) -> Self {
        self.select_target = target;
        self
    }

    #[must_use]
    pub const fn with_strict_code(mut self, strict: bool) -> Self {
        self.strict_code = strict;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub fn valid_code(code: &str) -> bool {
    Regex::new(r"^[0-9]{6}$").is_ok_and(|re| re.is_match(code))
}

#[derive(Debug)]
pub struct TwoFactorResolver {
    strategy: TwoFaStrategy,
    config: TwoFaConfig,
}

impl TwoFactorResolver {
    #[must_use]
    pub const fn new(strategy: TwoFaStrategy, config: TwoFaConfig) -> Self {
        Self { strategy, config }
    }

    #[must_use]
    pub const fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    #[must_use]
    pub const fn config(&self) -> &TwoFaConfig {
        &self.config
    }

    /// Device the resolver would answer for.
    #[must_use]
    pub fn select_device<'a>(&self, devices: &'a [Device]) -> Option<&'a Device> {
        select_device(devices, self.config.select_target.as_deref())
    }

    /// Answer one challenge within the configured timeout.
    ///
    /// `page` is the login page the challenge appeared on; only the push strategy looks at it.
    ///
    /// # Errors
    ///
    /// [`TwoFaError::Timeout`] when the strategy takes longer than allowed,
    /// [`TwoFaError::InvalidCode`] when strict checking rejects the code, and
    /// [`TwoFaError::Unavailable`] when the strategy cannot answer at all.
    #[instrument(skip_all, fields(strategy = %self.kind()))]
    pub async fn resolve(
        &self,
        challenge: TwoFactorChallenge,
        page: &dyn Browser,
    ) -> Result<Resolution, TwoFaError> {
        if challenge.strategy != self.kind() {
            warn!(
                "Challenge asks for {} but {} is configured",
                challenge.strategy,
                self.kind()
            );
        }

        let device = self.select_device(&challenge.devices);
        if let Some(device) = device {
            info!("Resolving 2FA for device {}", device.name);
        }

        let work = async {
            match &self.strategy {
                TwoFaStrategy::Totp(generator) => generator
                    .current()
                    .map(Resolution::Code)
                    .map_err(|e| TwoFaError::Unavailable(format!("{e:#}"))),
                TwoFaStrategy::PushNotification(settings) => {
                    push::await_approval(page, settings).await
                }
                TwoFaStrategy::ExternalRequest(mailbox) => match &challenge.ack_token {
                    Some(token) => Ok(Resolution::Code(token.clone())),
                    None => mailbox.receive().await,
                },
                TwoFaStrategy::Custom(handler) => handler
                    .resolve(&challenge, device)
                    .await
                    .map_err(|e| TwoFaError::Unavailable(format!("{e:#}"))),
            }
        };

        let resolution = timeout(self.config.timeout, work)
            .await
            .map_err(|_| TwoFaError::Timeout(self.config.timeout))??;

        if let Resolution::Code(code) = &resolution {
            if self.config.strict_code && !valid_code(code) {
                return Err(TwoFaError::InvalidCode);
            }
        }

        Ok(resolution)
    }
}
