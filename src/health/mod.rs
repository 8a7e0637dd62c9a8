//! HTTP surface: liveness, readiness, status and operator controls.

pub mod handlers;

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, sync::watch};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::{session::SessionMaintainer, two_fa::AckMailbox};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthPaths {
    pub liveness: String,
    pub readiness: String,
    pub status: String,
    pub activate: String,
    pub deactivate: String,
    pub authenticate: String,
    pub two_fa: String,
}

impl Default for HealthPaths {
    fn default() -> Self {
        Self {
            liveness: "/livez".to_string(),
            readiness: "/readyz".to_string(),
            status: "/status".to_string(),
            activate: "/activate".to_string(),
            deactivate: "/deactivate".to_string(),
            authenticate: "/authenticate".to_string(),
            two_fa: "/two-fa".to_string(),
        }
    }
}

impl HealthPaths {
    fn all(&self) -> [&str; 7] {
        [
            &self.liveness,
            &self.readiness,
            &self.status,
            &self.activate,
            &self.deactivate,
            &self.authenticate,
            &self.two_fa,
        ]
    }

    /// Paths must be absolute and distinct.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending path.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for path in self.all() {
            if !path.starts_with('/') {
                return Err(anyhow!("health path {path:?} must start with '/'"));
            }
            if !seen.insert(path) {
                return Err(anyhow!("health path {path:?} is used twice"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    port: u16,
    paths: HealthPaths,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: 5001,
            paths: HealthPaths::default(),
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_paths(mut self, paths: HealthPaths) -> Self {
        self.paths = paths;
        self
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn paths(&self) -> &HealthPaths {
        &self.paths
    }
}

/// Build the router. Callers validate `paths` first; axum panics on bad or duplicate routes.
pub fn router(paths: &HealthPaths, maintainer: SessionMaintainer, mailbox: AckMailbox) -> Router {
    Router::new()
        .route(&paths.liveness, get(handlers::liveness))
        .route(&paths.readiness, get(handlers::readiness))
        .route(&paths.status, get(handlers::status))
        .route(&paths.activate, post(handlers::activate))
        .route(&paths.deactivate, post(handlers::deactivate))
        .route(&paths.authenticate, post(handlers::authenticate))
        .route(&paths.two_fa, post(handlers::two_fa))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(maintainer))
                .layer(Extension(mailbox)),
        )
}

/// Serve until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(
    config: &HealthConfig,
    maintainer: SessionMaintainer,
    mailbox: AckMailbox,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    config.paths.validate()?;

    let app = router(&config.paths, maintainer, mailbox);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
