// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::error;

use crate::coordinator::Coordinator;
use crate::version::Version;
use crate::webhook::PullRequestEvent;

pub const API_PREFIX: &str = "/api/v1";

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_HEADER: &str = "x-github-event";
const AUTH_HEADER: &str = "authorization";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub webhook_secret: String,
    pub http_secret: String,
    pub version: Option<Version>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/github/ghwebhook"), post(webhook_handler))
        .route(&format!("{API_PREFIX}/watchdog/config/reload"), post(reload_handler))
        .route(&format!("{API_PREFIX}/version"), get(version_handler))
        .with_state(state)
}

/// Validate a webhook body against `sha256=<hex>` from the signature header.
fn valid_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|value| value.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes()) == signature
}

fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Forge webhook endpoint. Accepts ping and pull-request payloads; returns
/// 200 on success and 500 on any handler error.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.webhook_secret.is_empty()
        && !valid_signature(&state.webhook_secret, &body, header_value(&headers, SIGNATURE_HEADER))
    {
        let message = "error parsing pull request event: invalid webhook signature";
        error!("{message}");
        return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
    }

    match header_value(&headers, EVENT_HEADER) {
        Some("ping") => (StatusCode::OK, "OK").into_response(),
        Some("pull_request") => {
            let event: PullRequestEvent = match serde_json::from_slice(&body) {
                Ok(event) => event,
                Err(err) => {
                    let message = format!("error parsing pull request event: {err}");
                    error!("{message}");
                    return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
                }
            };
            if let Err(err) = state.coordinator.handle_pull_request(event).await {
                error!(%err, "error handling pull request payload");
                return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
            }
            StatusCode::OK.into_response()
        }
        other => {
            let message = format!("error parsing webhook event: unsupported event {other:?}");
            error!("{message}");
            (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
        }
    }
}

/// Manual reload endpoint, protected by a static secret in the
/// `Authorization` header. `?sync=1` blocks until the reload and follow-up
/// poll complete; otherwise the work happens in the background.
async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let presented = header_value(&headers, AUTH_HEADER).unwrap_or_default();
    if presented != state.http_secret {
        error!("reload request is not authorized");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    if params.get("sync").map(String::as_str) == Some("1") {
        if let Err(err) = state.coordinator.reload_and_poll(None).await {
            error!(%err, "error reloading manifests");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
        return StatusCode::OK.into_response();
    }

    tokio::spawn(async move {
        if let Err(err) = state.coordinator.reload_and_poll(None).await {
            error!(%err, "error reloading manifests from web handler");
        }
    });
    StatusCode::OK.into_response()
}

async fn version_handler(State(state): State<AppState>) -> Response {
    let Some(version) = &state.version else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "version unset").into_response();
    };
    Json(json!({"version": version})).into_response()
}
