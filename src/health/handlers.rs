use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::{
    session::{HealthSnapshot, SessionMaintainer},
    two_fa::{AckMailbox, Acknowledgment, Delivery},
    GIT_COMMIT_HASH,
};

#[derive(Serialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

impl Health {
    fn current() -> Self {
        Self {
            commit: GIT_COMMIT_HASH.to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn x_app(&self) -> HeaderMap {
        let short_hash = if self.commit.len() > 7 {
            &self.commit[0..7]
        } else {
            ""
        };

        format!("{}:{}:{}", self.name, self.version, short_hash)
            .parse::<HeaderValue>()
            .map(|x_app_header_value| {
                let mut headers = HeaderMap::new();
                headers.insert("X-App", x_app_header_value);
                headers
            })
            .unwrap_or_else(|err| {
                error!("Failed to parse X-App header: {}", err);
                HeaderMap::new()
            })
    }
}

fn body_for<T: Serialize>(method: &Method, value: &T) -> Response {
    if method == Method::GET {
        Json(value).into_response()
    } else {
        Body::empty().into_response()
    }
}

/// 200 whenever the process is up.
pub async fn liveness(method: Method) -> impl IntoResponse {
    let health = Health::current();
    let headers = health.x_app();

    (StatusCode::OK, headers, body_for(&method, &health))
}

/// 200 only while the gateway session is authenticated.
pub async fn readiness(
    method: Method,
    maintainer: Extension<SessionMaintainer>,
) -> impl IntoResponse {
    let snapshot = maintainer.snapshot().await;
    let headers = Health::current().x_app();

    let status = if snapshot.ready {
        StatusCode::OK
    } else {
        debug!("Not ready: {:?}", snapshot.state);
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body_for(&method, &snapshot))
}

#[derive(Serialize, Debug)]
pub struct Status {
    #[serde(flatten)]
    snapshot: HealthSnapshot,
    awaiting_two_fa: bool,
}

pub async fn status(
    maintainer: Extension<SessionMaintainer>,
    mailbox: Extension<AckMailbox>,
) -> impl IntoResponse {
    Json(Status {
        snapshot: maintainer.snapshot().await,
        awaiting_two_fa: mailbox.is_awaiting(),
    })
}

pub async fn activate(maintainer: Extension<SessionMaintainer>) -> impl IntoResponse {
    let changed = maintainer.activate().await;
    let snapshot = maintainer.snapshot().await;

    Json(json!({ "active": snapshot.active, "changed": changed }))
}

pub async fn deactivate(maintainer: Extension<SessionMaintainer>) -> impl IntoResponse {
    let changed = maintainer.deactivate().await;
    let snapshot = maintainer.snapshot().await;

    Json(json!({
        "active": snapshot.active,
        "changed": changed,
        "authenticating": snapshot.authenticating,
    }))
}

pub async fn authenticate(maintainer: Extension<SessionMaintainer>) -> impl IntoResponse {
    if maintainer.spawn_authenticate().await {
        info!("Manual authentication requested");
        (
            StatusCode::ACCEPTED,
            Json(json!({ "started": true })),
        )
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "error": "authentication already in progress" })),
        )
    }
}

pub async fn two_fa(
    mailbox: Extension<AckMailbox>,
    payload: Option<Json<Acknowledgment>>,
) -> impl IntoResponse {
    let ack = payload.map(|Json(ack)| ack).unwrap_or_default();

    match mailbox.deliver(ack) {
        Delivery::Accepted => {
            info!("2FA acknowledgment delivered");
            (StatusCode::ACCEPTED, Json(json!({ "accepted": true })))
        }
        Delivery::NotAwaiting => (
            StatusCode::CONFLICT,
            Json(json!({ "accepted": false, "error": "no 2FA challenge is waiting" })),
        ),
        Delivery::AlreadyPending => (
            StatusCode::CONFLICT,
            Json(json!({ "accepted": false, "error": "an acknowledgment is already pending" })),
        ),
    }
}
