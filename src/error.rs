//! Application error types for registry-proxy
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Scope-string parsing errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScopeError {
    /// Input does not match the Docker scope grammar
    #[error("unable to parse scope string: {0}")]
    InvalidScope(String),
}

/// Client-facing token errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    /// Token failed authentication, decoding, or is outside its validity window
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Token decrypted cleanly but the embedded upstream token claim is absent
    #[error("token is missing the upstream token claim")]
    ClaimsMissing,

    /// Secret key material could not be decoded
    #[error("invalid secret key: {0}")]
    InvalidKey(String),
}

/// Startup token-endpoint discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The registry host could not be reached
    #[error("failed to query registry {host}: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    /// The registry did not return a WWW-Authenticate challenge
    #[error("no WWW-Authenticate header returned from {0}, cannot locate token endpoint")]
    MissingChallenge(String),

    /// The challenge header could not be parsed
    #[error("WWW-Authenticate header from {host} could not be parsed: {header}")]
    UnparseableChallenge { host: String, header: String },
}

/// Per-request proxying errors
///
/// Every variant is answered with `502 Bad Gateway`: when a rewrite cannot
/// be performed safely the proxy fails closed rather than forwarding a
/// partially rewritten request or response.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No configured proxy matches the requested scope
    #[error("no matching proxy configuration was found for {0}")]
    NoMatchingProxy(String),

    /// A required query parameter was absent from the token request
    #[error("no {0} parameter was found in the request")]
    MissingParameter(&'static str),

    /// Scope string could not be parsed
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// Client-facing token could not be opened
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Authorization header present but not in `Bearer <token>` form
    #[error("Authorization header in unknown format: {0}")]
    AuthHeaderMalformed(String),

    /// The upstream request failed at the transport level
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The upstream token service response could not be used
    #[error("unusable upstream token response: {0}")]
    TokenResponse(String),

    /// No token endpoint is known for the registry host
    #[error("no token endpoint discovered for registry {0}")]
    UnknownTokenEndpoint(String),

    /// An upstream WWW-Authenticate header could not be parsed for rewriting
    #[error("parsing WWW-Authenticate header failed: {0}")]
    UnparseableChallenge(String),

    /// A rewritten URL or header value was not well-formed
    #[error("rewrite produced an invalid value: {0}")]
    InvalidRewrite(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string()
        });
        (
            StatusCode::BAD_GATEWAY,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
