//! Proxying components
//!
//! This module provides the two request paths of the proxy:
//! - `token`: the `/_token` exchange against upstream token services
//! - `registry`: the `/v2/…` data path to upstream registries
//!
//! plus the pieces they share: upstream selection (`matcher`), startup
//! token-endpoint discovery (`discovery`), and the request hygiene applied
//! to everything that leaves the proxy.

pub mod discovery;
pub mod matcher;
pub mod registry;
pub mod token;

pub use discovery::TokenEndpoints;
pub use matcher::ProxyTable;
pub use registry::RegistryProxy;
pub use token::TokenProxy;

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build the shared outbound HTTP client.
///
/// Redirects are never followed: 3xx responses belong to the client, after
/// Location fix-up. There is deliberately no overall request timeout, since
/// blob downloads are long-lived streams; only connecting is bounded.
pub fn upstream_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
}

/// Body of an upstream token endpoint response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub expires_in: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Replace the client's User-Agent with an augmented one naming the proxy.
/// Requests without a User-Agent are left without one.
pub(crate) fn augment_user_agent(headers: &mut HeaderMap, proxy_fqdn: &str) {
    let Some(original) = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };
    let merged = format!(
        "registryproxy/{} customDomain/{} {}",
        env!("CARGO_PKG_VERSION"),
        proxy_fqdn,
        original
    );
    if let Ok(value) = HeaderValue::from_str(&merged) {
        headers.insert(header::USER_AGENT, value);
    }
}

/// Remove every request header whose name begins with `X-`.
pub(crate) fn strip_x_headers(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("x-"))
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(name);
    }
}

/// Drop headers that must not be forwarded verbatim: the connection-level
/// ones the outbound client manages itself, and Host, which is derived
/// from the rewritten URL.
pub(crate) fn strip_connection_headers(headers: &mut HeaderMap) {
    for name in [
        header::HOST,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        header::CONNECTION,
    ] {
        headers.remove(name);
    }
}

/// Join two path fragments with exactly one slash between them.
pub(crate) fn slash_join(a: &str, b: &str) -> String {
    format!("{}/{}", a.trim_end_matches('/'), b.trim_start_matches('/'))
}
