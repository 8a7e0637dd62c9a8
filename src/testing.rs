//! In-memory collaborators for unit tests.
#![allow(clippy::unwrap_used)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{
    auth::{AuthResult, Authenticator},
    browser::{Browser, BrowserFactory, ElementRef},
    gateway::{GatewayProbe, GatewayStatus},
};

#[derive(Clone, Debug)]
pub struct FakeElement {
    pub id: String,
    pub css: String,
    pub visible: bool,
    pub enabled: bool,
    pub text: String,
    pub value: Option<String>,
}

impl FakeElement {
    pub fn new(id: &str, css: &str) -> Self {
        Self {
            id: id.to_string(),
            css: css.to_string(),
            visible: true,
            enabled: true,
            text: String::new(),
            value: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }
}

/// What the page shows at one moment.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub body: String,
    pub elements: Vec<FakeElement>,
}

impl Scene {
    pub fn new(body: &str) -> Self {
        Self {
            body: body.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn with(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }
}

#[derive(Default)]
struct PageState {
    scene: Scene,
    transitions: HashMap<String, VecDeque<Scene>>,
    actions: Vec<String>,
    screenshots: usize,
    closed: bool,
}

/// A scripted page: clicking or submitting an element moves to the next scene queued for it.
#[derive(Default)]
pub struct FakeBrowser {
    state: Mutex<PageState>,
}

impl FakeBrowser {
    pub fn new(scene: Scene) -> Self {
        Self {
            state: Mutex::new(PageState {
                scene,
                ..PageState::default()
            }),
        }
    }

    pub fn on_click(self, id: &str, scene: Scene) -> Self {
        self.state
            .lock()
            .unwrap()
            .transitions
            .entry(id.to_string())
            .or_default()
            .push_back(scene);
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn screenshots(&self) -> usize {
        self.state.lock().unwrap().screenshots
    }

    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn element(&self, element: &ElementRef) -> Result<FakeElement> {
        self.state
            .lock()
            .unwrap()
            .scene
            .elements
            .iter()
            .find(|candidate| candidate.id == element.id())
            .cloned()
            .ok_or_else(|| anyhow!("stale element reference: {}", element.id()))
    }

    fn act(&self, action: String, element: &ElementRef) {
        let mut state = self.state.lock().unwrap();
        state.actions.push(action);
        let next = state
            .transitions
            .get_mut(element.id())
            .and_then(VecDeque::pop_front);
        if let Some(scene) = next {
            state.scene = scene;
        }
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .actions
            .push(format!("navigate {url}"));
        Ok(())
    }

    async fn locate(&self, css: &str) -> Result<Vec<ElementRef>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .scene
            .elements
            .iter()
            .filter(|element| element.css == css)
            .map(|element| ElementRef::new(element.id.clone()))
            .collect())
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool> {
        Ok(self.element(element)?.visible)
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        Ok(self.element(element)?.enabled)
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        Ok(self.element(element)?.text)
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let element = self.element(element)?;
        Ok(match name {
            "value" => element.value,
            _ => None,
        })
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> Result<()> {
        self.element(element)?;
        self.state
            .lock()
            .unwrap()
            .actions
            .push(format!("fill {} {value}", element.id()));
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.element(element)?;
        self.act(format!("click {}", element.id()), element);
        Ok(())
    }

    async fn submit(&self, element: &ElementRef) -> Result<()> {
        self.element(element)?;
        self.act(format!("submit {}", element.id()), element);
        Ok(())
    }

    async fn page_text(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().scene.body.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.state.lock().unwrap().screenshots += 1;
        Ok(b"\x89PNG".to_vec())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

struct SharedBrowser(Arc<FakeBrowser>);

#[async_trait]
impl Browser for SharedBrowser {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.0.navigate(url).await
    }

    async fn locate(&self, css: &str) -> Result<Vec<ElementRef>> {
        self.0.locate(css).await
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool> {
        self.0.is_visible(element).await
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        self.0.is_enabled(element).await
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        self.0.text(element).await
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        self.0.attribute(element, name).await
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> Result<()> {
        self.0.fill(element, value).await
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.0.click(element).await
    }

    async fn submit(&self, element: &ElementRef) -> Result<()> {
        self.0.submit(element).await
    }

    async fn page_text(&self) -> Result<String> {
        self.0.page_text().await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.0.screenshot().await
    }

    async fn close(&self) -> Result<()> {
        self.0.close().await
    }
}

/// Hands out the same scripted page on every `open`.
pub struct FakeBrowsers {
    pub page: Arc<FakeBrowser>,
    pub opened: AtomicUsize,
}

impl FakeBrowsers {
    pub fn new(page: FakeBrowser) -> Self {
        Self {
            page: Arc::new(page),
            opened: AtomicUsize::new(0),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserFactory for FakeBrowsers {
    async fn open(&self) -> Result<Box<dyn Browser>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SharedBrowser(self.page.clone())))
    }
}

/// Gateway whose answers are set by the test.
///
/// `validate` pops scripted answers first, then falls back to `authenticated`.
/// With `hold_tickle` set, `tickle` signals `tickle_started` and waits for `tickle_release`.
#[derive(Default)]
pub struct FakeGateway {
    pub down: AtomicBool,
    pub authenticated: AtomicBool,
    pub tickle_fails: AtomicBool,
    pub hold_tickle: AtomicBool,
    pub tickle_started: Notify,
    pub tickle_release: Notify,
    pub validate_fails: AtomicBool,
    pub script: Mutex<VecDeque<bool>>,
    pub pings: AtomicUsize,
    pub tickles: AtomicUsize,
    pub validations: AtomicUsize,
}

impl FakeGateway {
    pub fn authenticated() -> Self {
        let gateway = Self::default();
        gateway.authenticated.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn with_script(self, answers: &[bool]) -> Self {
        self.script.lock().unwrap().extend(answers.iter().copied());
        self
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayProbe for FakeGateway {
    async fn ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        !self.down.load(Ordering::SeqCst)
    }

    async fn tickle(&self) -> Result<GatewayStatus> {
        self.tickles.fetch_add(1, Ordering::SeqCst);
        if self.hold_tickle.load(Ordering::SeqCst) {
            self.tickle_started.notify_one();
            self.tickle_release.notified().await;
        }
        if self.tickle_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(GatewayStatus {
            session: true,
            authenticated: self.authenticated.load(Ordering::SeqCst),
            connected: true,
            competing: false,
            server_name: Some("JifN19053".to_string()),
        })
    }

    async fn validate(&self) -> Result<bool> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.validate_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }
        if let Some(answer) = self.script.lock().unwrap().pop_front() {
            return Ok(answer);
        }
        Ok(self.authenticated.load(Ordering::SeqCst))
    }
}

/// Returns queued results, then `fallback`.
pub struct ScriptedAuthenticator {
    results: Mutex<VecDeque<AuthResult>>,
    fallback: AuthResult,
    pub calls: AtomicUsize,
}

impl ScriptedAuthenticator {
    pub fn always(result: AuthResult) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            fallback: result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: AuthResult) -> Self {
        self.results.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for ScriptedAuthenticator {
    async fn attempt_login(&self) -> AuthResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
