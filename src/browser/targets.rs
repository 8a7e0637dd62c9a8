//! Element targets and condition waiting.
//!
//! A target is written `TYPE@@identifier`, for example `NAME@@username` or
//! `CSS_SELECTOR@@.btn.btn-primary`. `TAG_NAME` targets match text anywhere on the page
//! rather than an element.

use std::{fmt, str::FromStr, time::Duration};

use anyhow::Result;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::{Browser, ElementRef};

pub const TARGET_SEPARATOR: &str = "@@";

pub const POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Id,
    CssSelector,
    ClassName,
    Name,
    For,
    TagName,
}

impl TargetKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::CssSelector => "CSS_SELECTOR",
            Self::ClassName => "CLASS_NAME",
            Self::Name => "NAME",
            Self::For => "FOR",
            Self::TagName => "TAG_NAME",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("target {0:?} is missing the '{TARGET_SEPARATOR}' separator")]
    MissingSeparator(String),
    #[error("unknown target type {0:?}")]
    UnknownKind(String),
    #[error("target {0:?} has an empty identifier")]
    EmptyIdentifier(String),
}

impl FromStr for TargetKind {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ID" => Ok(Self::Id),
            "CSS_SELECTOR" => Ok(Self::CssSelector),
            "CLASS_NAME" => Ok(Self::ClassName),
            "NAME" => Ok(Self::Name),
            "FOR" => Ok(Self::For),
            "TAG_NAME" => Ok(Self::TagName),
            other => Err(TargetParseError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    kind: TargetKind,
    identifier: String,
}

impl Target {
    pub fn new(kind: TargetKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TargetKind {
        self.kind
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether this target matches page text instead of an element.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.kind == TargetKind::TagName
    }

    /// CSS selector that locates this target's elements.
    #[must_use]
    pub fn css(&self) -> String {
        match self.kind {
            TargetKind::Id => format!("#{}", self.identifier),
            TargetKind::CssSelector => self.identifier.clone(),
            TargetKind::ClassName => format!(".{}", self.identifier),
            TargetKind::Name => format!("[name=\"{}\"]", self.identifier),
            TargetKind::For => format!("label[for=\"{}\"]", self.identifier),
            TargetKind::TagName => "body".to_string(),
        }
    }
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, identifier) = s
            .split_once(TARGET_SEPARATOR)
            .ok_or_else(|| TargetParseError::MissingSeparator(s.to_string()))?;

        if identifier.trim().is_empty() {
            return Err(TargetParseError::EmptyIdentifier(s.to_string()));
        }

        Ok(Self::new(kind.parse()?, identifier.trim()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{TARGET_SEPARATOR}{}",
            self.kind.as_str(),
            self.identifier
        )
    }
}

/// The login page elements the driver reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    UserName,
    Password,
    Submit,
    Success,
    Error,
    TwoFa,
    TwoFaSelect,
    TwoFaNotification,
    TwoFaInput,
    KeyPromo,
    PaperToggle,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Targets {
    pub user_name: Target,
    pub password: Target,
    pub submit: Target,
    pub success: Target,
    pub error: Target,
    pub two_fa: Target,
    pub two_fa_select: Target,
    pub two_fa_notification: Target,
    pub two_fa_input: Target,
    pub key_promo: Target,
    pub paper_toggle: Target,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            user_name: Target::new(TargetKind::Name, "username"),
            password: Target::new(TargetKind::Name, "password"),
            submit: Target::new(TargetKind::CssSelector, ".btn.btn-lg.btn-primary"),
            success: Target::new(TargetKind::TagName, "Client login succeeds"),
            error: Target::new(TargetKind::CssSelector, ".xyz-errormessage"),
            two_fa: Target::new(TargetKind::Id, "twofactbase"),
            two_fa_select: Target::new(TargetKind::Id, "sf_select"),
            two_fa_notification: Target::new(TargetKind::ClassName, "login-step-notification"),
            two_fa_input: Target::new(TargetKind::Id, "xyz-field-bronze-response"),
            key_promo: Target::new(TargetKind::ClassName, "ibkey-promo-skip"),
            paper_toggle: Target::new(TargetKind::For, "toggle1"),
        }
    }
}

impl Targets {
    #[must_use]
    pub const fn get(&self, step: Step) -> &Target {
        match step {
            Step::UserName => &self.user_name,
            Step::Password => &self.password,
            Step::Submit => &self.submit,
            Step::Success => &self.success,
            Step::Error => &self.error,
            Step::TwoFa => &self.two_fa,
            Step::TwoFaSelect => &self.two_fa_select,
            Step::TwoFaNotification => &self.two_fa_notification,
            Step::TwoFaInput => &self.two_fa_input,
            Step::KeyPromo => &self.key_promo,
            Step::PaperToggle => &self.paper_toggle,
        }
    }

    #[must_use]
    pub fn with(mut self, step: Step, target: Target) -> Self {
        let slot = match step {
            Step::UserName => &mut self.user_name,
            Step::Password => &mut self.password,
            Step::Submit => &mut self.submit,
            Step::Success => &mut self.success,
            Step::Error => &mut self.error,
            Step::TwoFa => &mut self.two_fa,
            Step::TwoFaSelect => &mut self.two_fa_select,
            Step::TwoFaNotification => &mut self.two_fa_notification,
            Step::TwoFaInput => &mut self.two_fa_input,
            Step::KeyPromo => &mut self.key_promo,
            Step::PaperToggle => &mut self.paper_toggle,
        };
        *slot = target;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Present,
    Visible,
    Clickable,
    HasText,
}

/// What `wait_for_any` observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trigger<K> {
    pub key: K,
    pub element: Option<ElementRef>,
    pub text: String,
}

/// Poll the page until any of the wanted conditions holds, in order of preference.
///
/// Returns `Ok(None)` once `timeout` elapses. Errors raised while probing a single
/// condition (stale elements, navigation in progress) are treated as "not yet".
///
/// # Errors
///
/// Currently none; the signature leaves room for fatal browser errors.
pub async fn wait_for_any<K: Copy + fmt::Debug>(
    browser: &dyn Browser,
    wanted: &[(K, &Target, Condition)],
    timeout: Duration,
) -> Result<Option<Trigger<K>>> {
    let deadline = Instant::now() + timeout;

    loop {
        for &(key, target, condition) in wanted {
            match probe(browser, target, condition).await {
                Ok(Some((element, text))) => {
                    debug!("{key:?} matched {target} ({condition:?})");
                    return Ok(Some(Trigger { key, element, text }));
                }
                Ok(None) => {}
                Err(e) => debug!("probe for {target} failed: {e:#}"),
            }
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }

        sleep(POLL_INTERVAL).await;
    }
}

async fn probe(
    browser: &dyn Browser,
    target: &Target,
    condition: Condition,
) -> Result<Option<(Option<ElementRef>, String)>> {
    if target.is_text() {
        let text = browser.page_text().await?;
        return Ok(text
            .contains(target.identifier())
            .then(|| (None, target.identifier().to_string())));
    }

    for element in browser.locate(&target.css()).await? {
        let matched = match condition {
            Condition::Present => true,
            Condition::Visible => browser.is_visible(&element).await?,
            Condition::Clickable => {
                browser.is_visible(&element).await? && browser.is_enabled(&element).await?
            }
            // an element target has text once it renders something non-blank
            Condition::HasText => {
                browser.is_visible(&element).await?
                    && !browser.text(&element).await?.trim().is_empty()
            }
        };

        if matched {
            let text = browser.text(&element).await.unwrap_or_default();
            return Ok(Some((Some(element), text)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBrowser, FakeElement, Scene};

    #[test]
    fn parse_targets() {
        let target: Target = "NAME@@username".parse().unwrap();
        assert_eq!(target.kind(), TargetKind::Name);
        assert_eq!(target.identifier(), "username");
        assert_eq!(target.css(), "[name=\"username\"]");
        assert_eq!(target.to_string(), "NAME@@username");

        let target: Target = "css_selector@@a[onclick*='resendNotification()']"
            .parse()
            .unwrap();
        assert_eq!(target.kind(), TargetKind::CssSelector);
        assert_eq!(target.css(), "a[onclick*='resendNotification()']");

        assert_eq!(
            "ID@@twofactbase".parse::<Target>().unwrap().css(),
            "#twofactbase"
        );
        assert_eq!(
            "CLASS_NAME@@ibkey-promo-skip".parse::<Target>().unwrap().css(),
            ".ibkey-promo-skip"
        );
        assert_eq!(
            "FOR@@toggle1".parse::<Target>().unwrap().css(),
            "label[for=\"toggle1\"]"
        );
        assert!("TAG_NAME@@Client login succeeds"
            .parse::<Target>()
            .unwrap()
            .is_text());
    }

    #[test]
    fn parse_rejects_malformed_targets() {
        assert_eq!(
            "username".parse::<Target>(),
            Err(TargetParseError::MissingSeparator("username".to_string()))
        );
        assert_eq!(
            "XPATH@@//div".parse::<Target>(),
            Err(TargetParseError::UnknownKind("XPATH".to_string()))
        );
        assert!(matches!(
            "ID@@  ".parse::<Target>(),
            Err(TargetParseError::EmptyIdentifier(_))
        ));
    }

    #[test]
    fn targets_override_one_step() {
        let custom = Target::new(TargetKind::Id, "login");
        let targets = Targets::default().with(Step::Submit, custom.clone());
        assert_eq!(targets.get(Step::Submit), &custom);
        assert_eq!(targets.get(Step::UserName), &Targets::default().user_name);
    }

    #[tokio::test]
    async fn wait_prefers_first_matching_condition() {
        let targets = Targets::default();
        let browser = FakeBrowser::new(
            Scene::new("Client login succeeds")
                .with(FakeElement::new("err", ".xyz-errormessage").with_text("nope")),
        );

        let trigger = wait_for_any(
            &browser,
            &[
                (Step::Success, &targets.success, Condition::HasText),
                (Step::Error, &targets.error, Condition::Visible),
            ],
            Duration::from_millis(10),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(trigger.key, Step::Success);
        assert_eq!(trigger.element, None);
    }

    #[tokio::test]
    async fn has_text_reads_element_targets() {
        let success = Target::new(TargetKind::CssSelector, ".login-done");
        let blank = FakeBrowser::new(
            Scene::new(".login-done").with(FakeElement::new("done", ".login-done")),
        );

        let missed = wait_for_any(
            &blank,
            &[(Step::Success, &success, Condition::HasText)],
            Duration::from_millis(10),
        )
        .await
        .unwrap();
        assert_eq!(missed, None);

        let rendered = FakeBrowser::new(
            Scene::new("").with(FakeElement::new("done", ".login-done").with_text("Welcome")),
        );
        let trigger = wait_for_any(
            &rendered,
            &[(Step::Success, &success, Condition::HasText)],
            Duration::from_millis(10),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(trigger.element, Some(ElementRef::new("done")));
        assert_eq!(trigger.text, "Welcome");
    }

    #[tokio::test]
    async fn wait_skips_hidden_and_disabled_elements() {
        let targets = Targets::default();
        let browser = FakeBrowser::new(
            Scene::new("")
                .with(FakeElement::new("hidden", "[name=\"username\"]").hidden())
                .with(FakeElement::new("off", ".xyz-errormessage").disabled().with_text("bad")),
        );

        let trigger = wait_for_any(
            &browser,
            &[
                (Step::UserName, &targets.user_name, Condition::Visible),
                (Step::Error, &targets.error, Condition::Clickable),
                (Step::Error, &targets.error, Condition::Present),
            ],
            Duration::from_millis(10),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(trigger.key, Step::Error);
        assert_eq!(trigger.element, Some(ElementRef::new("off")));
        assert_eq!(trigger.text, "bad");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let targets = Targets::default();
        let browser = FakeBrowser::new(Scene::new("loading"));

        let trigger = wait_for_any(
            &browser,
            &[(Step::UserName, &targets.user_name, Condition::Clickable)],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(trigger.is_none());
    }
}
