//! HTTP router for registry-proxy
//!
//! This module defines the axum router that handles all HTTP requests:
//! - `/health` liveness check
//! - `/_token` token exchange
//! - `/v2/` version check sentinel (the 401 that starts the token flow)
//! - `/v2/*path` data-path proxying with namespace rewriting
//!
//! Paths under `/v2/` that match no configured local prefix fall through to
//! the same challenge the sentinel serves, so unknown namespaces still push
//! clients into the token flow.

use std::sync::Arc;

use axum::extract::{Host, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::proxy::{ProxyTable, RegistryProxy, TokenProxy};

/// Body served with the `/v2/` challenge, in the registry error format
/// Docker clients expect.
const UNAUTHORIZED_BODY: &str =
    r#"{"errors":[{"code":"UNAUTHORIZED","message":"authentication required","detail":null}]}"#;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub table: Arc<ProxyTable>,
    pub token_proxy: Arc<TokenProxy>,
    pub registry_proxy: Arc<RegistryProxy>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the main application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/_token", any(token_handler))
        .route("/v2/", any(challenge_handler))
        .route("/v2/*path", any(data_path_handler))
        .with_state(state)
}

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Token exchange endpoint handler
async fn token_handler(State(state): State<AppState>, req: Request) -> Response {
    match state.token_proxy.exchange(req).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(error = %error, "token exchange failed");
            error.into_response()
        }
    }
}

/// `/v2/` sentinel handler: an unauthorized response whose challenge points
/// the client at the proxy's own token endpoint
async fn challenge_handler(Host(host): Host) -> Response {
    challenge_response(&host)
}

/// Data-path handler: route to the mapping rooted at the request path, or
/// fall back to the challenge for unknown namespaces
async fn data_path_handler(
    State(state): State<AppState>,
    Host(host): Host,
    req: Request,
) -> Response {
    let Some(item) = state.table.match_path(req.uri().path()).cloned() else {
        tracing::debug!(path = %req.uri().path(), "no proxy configured for path");
        return challenge_response(&host);
    };

    match state.registry_proxy.forward(&item, req).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(error = %error, local = %item.local_prefix, "data-path proxying failed");
            error.into_response()
        }
    }
}

fn challenge_response(host: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::WWW_AUTHENTICATE,
                format!(r#"Bearer realm="https://{}/_token",service="{}""#, host, host),
            ),
        ],
        UNAUTHORIZED_BODY,
    )
        .into_response()
}
