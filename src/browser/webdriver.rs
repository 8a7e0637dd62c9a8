//! [`Browser`] over the W3C WebDriver HTTP protocol (chromedriver, geckodriver).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{Browser, BrowserFactory, ElementRef};
use crate::APP_USER_AGENT;

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Enter key in the WebDriver key table.
const ENTER_KEY: &str = "\u{E007}";

#[derive(Clone, Debug)]
pub struct WebDriverConfig {
    url: String,
    headless: bool,
    page_load_timeout: Duration,
    request_timeout: Duration,
}

impl WebDriverConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headless: true,
            page_load_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(90),
        }
    }

    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub const fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--ignore-certificate-errors", "--window-size=1920,1080"];
        if self.headless {
            args.extend(["--headless=new", "--no-sandbox", "--disable-dev-shm-usage"]);
        }

        let page_load_ms = u64::try_from(self.page_load_timeout.as_millis()).unwrap_or(u64::MAX);

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "acceptInsecureCerts": true,
                    "timeouts": { "pageLoad": page_load_ms },
                    "goog:chromeOptions": { "args": args },
                }
            }
        })
    }
}

pub struct WebDriverFactory {
    client: Client,
    config: WebDriverConfig,
}

impl WebDriverFactory {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: WebDriverConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl BrowserFactory for WebDriverFactory {
    #[instrument(skip(self), fields(webdriver = %self.config.url))]
    async fn open(&self) -> Result<Box<dyn Browser>> {
        let base = self.config.url.trim_end_matches('/');
        let session_url = format!("{base}/session");

        let response = self
            .client
            .post(&session_url)
            .json(&self.config.capabilities())
            .send()
            .await
            .with_context(|| format!("WebDriver not reachable at {base}"))?;

        let status = response.status();
        let json_response: Value = response.json().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "{} - {}, {}",
                session_url,
                status,
                webdriver_error_message(&json_response)
            ));
        }

        let session_id = json_response["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| anyhow!("Error parsing WebDriver response: no sessionId found"))?;

        debug!("WebDriver session {session_id} opened");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{session_url}/{session_id}"),
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    session_url: String,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.session_url);

        let request = self.client.request(method.clone(), &url);
        let request = match body {
            Some(body) => request.json(&body),
            None if method == Method::POST => request.json(&json!({})),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let json_response: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(anyhow!(
                "{} - {}, {}",
                url,
                status,
                webdriver_error_message(&json_response)
            ));
        }

        Ok(json_response.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn element_bool(&self, element: &ElementRef, property: &str) -> Result<bool> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/{property}", element.id()),
                None,
            )
            .await?;

        value
            .as_bool()
            .ok_or_else(|| anyhow!("Error parsing WebDriver response: {property} is not a bool"))
    }
}

fn webdriver_error_message(json_response: &Value) -> String {
    let value = &json_response["value"];
    match (value["error"].as_str(), value["message"].as_str()) {
        (Some(error), Some(message)) => format!("{error}: {message}"),
        (Some(error), None) => error.to_string(),
        _ => String::new(),
    }
}

fn element_refs(value: &Value) -> Vec<ElementRef> {
    value
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element[ELEMENT_KEY].as_str())
                .map(ElementRef::new)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Browser for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn locate(&self, css: &str) -> Result<Vec<ElementRef>> {
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": css })),
            )
            .await?;

        Ok(element_refs(&value))
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool> {
        self.element_bool(element, "displayed").await
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool> {
        self.element_bool(element, "enabled").await
    }

    async fn text(&self, element: &ElementRef) -> Result<String> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id()), None)
            .await?;

        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> Result<Option<String>> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{name}", element.id()),
                None,
            )
            .await?;

        Ok(value.as_str().map(ToString::to_string))
    }

    async fn fill(&self, element: &ElementRef, value: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element.id()),
            None,
        )
        .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id()),
            Some(json!({ "text": value })),
        )
        .await?;
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id()),
            None,
        )
        .await?;
        Ok(())
    }

    async fn submit(&self, element: &ElementRef) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.id()),
            Some(json!({ "text": ENTER_KEY })),
        )
        .await?;
        Ok(())
    }

    async fn page_text(&self) -> Result<String> {
        let Some(body) = self.locate("body").await?.into_iter().next() else {
            return Ok(String::new());
        };
        self.text(&body).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow!("Error parsing WebDriver response: no screenshot data"))?;

        Base64::decode_vec(encoded).map_err(|e| anyhow!("invalid screenshot encoding: {e}"))
    }

    async fn close(&self) -> Result<()> {
        self.command(Method::DELETE, "", None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn open_session(server: &MockServer) -> Box<dyn Browser> {
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc123", "capabilities": {} }
            })))
            .mount(server)
            .await;

        let factory = WebDriverFactory::new(WebDriverConfig::new(server.uri())).unwrap();
        factory.open().await.unwrap()
    }

    #[test]
    fn headless_capabilities() {
        let caps = WebDriverConfig::new("http://localhost:9515")
            .with_page_load_timeout(Duration::from_secs(30))
            .capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|arg| arg == "--headless=new"));
        assert_eq!(
            caps["capabilities"]["alwaysMatch"]["timeouts"]["pageLoad"],
            30_000
        );

        let caps = WebDriverConfig::new("http://localhost:9515")
            .with_headless(false)
            .capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(!args.iter().any(|arg| arg == "--headless=new"));
    }

    #[tokio::test]
    async fn locate_returns_element_refs() {
        let server = MockServer::start().await;
        let browser = open_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/session/abc123/elements"))
            .and(body_json(json!({ "using": "css selector", "value": "[name=\"username\"]" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { ELEMENT_KEY: "e1" },
                    { ELEMENT_KEY: "e2" },
                ]
            })))
            .mount(&server)
            .await;

        let elements = browser.locate("[name=\"username\"]").await.unwrap();
        assert_eq!(elements, vec![ElementRef::new("e1"), ElementRef::new("e2")]);
    }

    #[tokio::test]
    async fn screenshot_is_decoded() {
        let server = MockServer::start().await;
        let browser = open_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/session/abc123/screenshot"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "value": Base64::encode_string(b"\x89PNG") })),
            )
            .mount(&server)
            .await;

        assert_eq!(browser.screenshot().await.unwrap(), b"\x89PNG".to_vec());
    }

    #[tokio::test]
    async fn errors_carry_webdriver_message() {
        let server = MockServer::start().await;
        let browser = open_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/session/abc123/element/gone/displayed"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "stale element reference", "message": "element is not attached" }
            })))
            .mount(&server)
            .await;

        let err = browser
            .is_visible(&ElementRef::new("gone"))
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("404"));
        assert!(err.contains("stale element reference: element is not attached"));
    }

    #[tokio::test]
    async fn session_creation_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "value": { "error": "session not created", "message": "Chrome failed to start" }
            })))
            .mount(&server)
            .await;

        let factory = WebDriverFactory::new(WebDriverConfig::new(server.uri())).unwrap();
        let err = factory.open().await.err().unwrap().to_string();
        assert!(err.contains("session not created"));
    }

    #[tokio::test]
    async fn close_deletes_session() {
        let server = MockServer::start().await;
        let browser = open_session(&server).await;

        Mock::given(method("DELETE"))
            .and(path("/session/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        browser.close().await.unwrap();
    }
}
