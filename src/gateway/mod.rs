//! HTTP client for the gateway's own endpoints.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::APP_USER_AGENT;

/// Gateway paths, relative to the base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Routes {
    pub auth: String,
    pub tickle: String,
    pub validate: String,
    pub logout: String,
    pub liveness: String,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            auth: "/sso/Login?forwardTo=22&RL=1&ip2loc=on".to_string(),
            tickle: "/v1/api/tickle".to_string(),
            validate: "/v1/portal/sso/validate".to_string(),
            logout: "/v1/api/logout".to_string(),
            liveness: "/".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    base_url: Url,
    routes: Routes,
    request_timeout: Duration,
    accept_invalid_certs: bool,
}

impl GatewayConfig {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid gateway URL {base_url}"))?;

        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        }

        if base_url.host().is_none() {
            return Err(anyhow!("Error parsing URL: no host specified"));
        }

        Ok(Self {
            base_url,
            routes: Routes::default(),
            request_timeout: Duration::from_secs(15),
            // the gateway ships a self-signed certificate
            accept_invalid_certs: true,
        })
    }

    #[must_use]
    pub fn with_routes(mut self, routes: Routes) -> Self {
        self.routes = routes;
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_tls_verify(mut self, verify: bool) -> Self {
        self.accept_invalid_certs = !verify;
        self
    }

    #[must_use]
    pub const fn routes(&self) -> &Routes {
        &self.routes
    }

    /// Absolute URL for a gateway path.
    #[must_use]
    pub fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// Where the browser logs in.
    #[must_use]
    pub fn login_url(&self) -> String {
        self.url(&self.routes.auth)
    }
}

/// Parsed tickle response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub session: bool,
    pub connected: bool,
    pub authenticated: bool,
    pub competing: bool,
    pub server_name: Option<String>,
}

impl GatewayStatus {
    fn from_tickle(json_response: &Value) -> Self {
        let auth_status = &json_response["iserver"]["authStatus"];
        Self {
            session: json_response["session"]
                .as_str()
                .is_some_and(|session| !session.is_empty()),
            connected: auth_status["connected"].as_bool().unwrap_or(false),
            authenticated: auth_status["authenticated"].as_bool().unwrap_or(false),
            competing: auth_status["competing"].as_bool().unwrap_or(false),
            server_name: auth_status["serverInfo"]["serverName"]
                .as_str()
                .map(ToString::to_string),
        }
    }
}

/// What the session maintainer and login driver need from the gateway.
#[async_trait]
pub trait GatewayProbe: Send + Sync {
    /// Whether the gateway accepts connections at all.
    async fn ping(&self) -> bool;

    /// Keep-alive. Errors are transient.
    async fn tickle(&self) -> Result<GatewayStatus>;

    /// `Ok(true)` when the session is authenticated, `Ok(false)` when it is not,
    /// `Err` when the gateway could not say.
    async fn validate(&self) -> Result<bool>;
}

pub struct GatewayClient {
    client: Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// End the gateway session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the gateway rejects it.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let logout_url = self.config.url(&self.config.routes.logout);

        let response = self.client.post(&logout_url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or(Value::Null);

            return Err(anyhow!(
                "{} - {}, {}",
                logout_url,
                status,
                gateway_error_message(&json_response)
            ));
        }

        Ok(())
    }
}

fn gateway_error_message(json_response: &Value) -> &str {
    json_response["error"]
        .as_str()
        .or_else(|| json_response["message"].as_str())
        .unwrap_or("")
}

#[async_trait]
impl GatewayProbe for GatewayClient {
    #[instrument(skip(self))]
    async fn ping(&self) -> bool {
        let liveness_url = self.config.url(&self.config.routes.liveness);

        match self.client.get(&liveness_url).send().await {
            Ok(response) => {
                debug!("Gateway answered {} on {}", response.status(), liveness_url);
                true
            }
            Err(e) => {
                debug!("Gateway not reachable: {e}");
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn tickle(&self) -> Result<GatewayStatus> {
        let tickle_url = self.config.url(&self.config.routes.tickle);

        let response = self.client.post(&tickle_url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or(Value::Null);

            return Err(anyhow!(
                "{} - {}, {}",
                tickle_url,
                status,
                gateway_error_message(&json_response)
            ));
        }

        let json_response: Value = response.json().await?;
        let status = GatewayStatus::from_tickle(&json_response);

        debug!(?status, "tickle");

        Ok(status)
    }

    #[instrument(skip(self))]
    async fn validate(&self) -> Result<bool> {
        let validate_url = self.config.url(&self.config.routes.validate);

        let response = self.client.get(&validate_url).send().await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Ok(false),
            status if !status.is_success() => {
                let json_response: Value = response.json().await.unwrap_or(Value::Null);

                return Err(anyhow!(
                    "{} - {}, {}",
                    validate_url,
                    status,
                    gateway_error_message(&json_response)
                ));
            }
            _ => {}
        }

        let json_response: Value = response.json().await?;

        Ok(json_response["RESULT"].as_bool().unwrap_or(false))
    }
}
