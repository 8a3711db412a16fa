//! Registry data-path proxying
//!
//! Everything under `/v2/{local_prefix}/` flows through here: the URL
//! namespace is rewritten into the upstream's, the client's opaque bearer
//! token is opened and replaced with the embedded upstream token, and the
//! response's `Location` and `WWW-Authenticate` headers are rewritten to
//! keep the client talking to the proxy.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tracing::{debug, info};
use url::Url;

use crate::auth::{BearerChallenge, ResourceScope, TokenCipher};
use crate::config::ProxyItem;
use crate::error::ProxyError;
use crate::proxy::matcher::local_path;
use crate::proxy::{augment_user_agent, slash_join, strip_connection_headers, strip_x_headers};

/// Forwards data-path requests to upstream registries.
pub struct RegistryProxy {
    cipher: Arc<TokenCipher>,
    client: reqwest::Client,
    proxy_fqdn: String,
}

impl RegistryProxy {
    pub fn new(cipher: Arc<TokenCipher>, client: reqwest::Client, proxy_fqdn: String) -> Self {
        Self {
            cipher,
            client,
            proxy_fqdn,
        }
    }

    /// Rewrite and forward one data-path request, then rewrite the
    /// response headers.
    pub async fn forward(&self, item: &ProxyItem, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let original_uri = parts.uri.clone();

        // Rewrite phase: move the path into the upstream namespace
        let rewritten_path = rewrite_path(parts.uri.path(), item);
        let mut url = Url::parse(&format!("{}{}", item.registry_url(), rewritten_path))
            .map_err(|e| ProxyError::InvalidRewrite(format!("upstream url: {}", e)))?;
        url.set_query(parts.uri.query());
        info!(from = %original_uri, to = %url, "rewrote data-path url");

        // Forward phase: substitute the client's opaque token for the
        // embedded upstream token
        let mut headers = parts.headers;
        if let Some(auth) = headers.get(header::AUTHORIZATION).cloned() {
            let auth = auth
                .to_str()
                .map_err(|_| ProxyError::AuthHeaderMalformed("non-ascii value".to_string()))?;
            let wrapped = auth.strip_prefix("Bearer ").ok_or_else(|| {
                let scheme = auth.split_whitespace().next().unwrap_or("").to_string();
                ProxyError::AuthHeaderMalformed(scheme)
            })?;
            let upstream_token = self.cipher.open(wrapped)?;
            let value = HeaderValue::from_str(&format!("Bearer {}", upstream_token))
                .map_err(|_| ProxyError::InvalidRewrite("upstream token header".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
            debug!("replaced client token with upstream token");
        }

        strip_connection_headers(&mut headers);
        augment_user_agent(&mut headers, &self.proxy_fqdn);
        strip_x_headers(&mut headers);

        let mut builder = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers);
        if parts.method != Method::GET && parts.method != Method::HEAD {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "upstream registry responded");

        // Response rewrite phase
        let mut resp_headers = response.headers().clone();

        // Some registries answer blob GETs with host-relative download
        // URLs; resolve them against the upstream so the client does not
        // route the download back through the proxy
        if parts.method == Method::GET && status == StatusCode::FOUND {
            if let Some(location) = resp_headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                if location.starts_with('/') {
                    let absolute = format!("{}{}", item.registry_url(), location);
                    info!(location = %absolute, "rewrote relative redirect location");
                    resp_headers.insert(
                        header::LOCATION,
                        HeaderValue::from_str(&absolute).map_err(|_| {
                            ProxyError::InvalidRewrite("redirect location".to_string())
                        })?,
                    );
                }
            }
        }

        // Point any authentication challenge back at the proxy's own token
        // endpoint, with the scope translated into the local namespace
        if let Some(challenge_value) = resp_headers
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        {
            let rewritten = self.rewrite_challenge(&challenge_value, item)?;
            resp_headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_str(&rewritten).map_err(|_| {
                    ProxyError::InvalidRewrite("www-authenticate header".to_string())
                })?,
            );
            info!(from = %challenge_value, to = %rewritten, "rewrote www-authenticate header");
        }

        resp_headers.remove(header::TRANSFER_ENCODING);
        resp_headers.remove(header::CONNECTION);

        let mut out = Response::new(Body::from_stream(response.bytes_stream()));
        *out.status_mut() = status;
        *out.headers_mut() = resp_headers;
        Ok(out)
    }

    /// Replace realm and service with the proxy's own token endpoint and
    /// translate the challenge scope back into the local namespace.
    fn rewrite_challenge(
        &self,
        challenge_value: &str,
        item: &ProxyItem,
    ) -> Result<String, ProxyError> {
        let mut challenge = BearerChallenge::parse(challenge_value)
            .ok_or_else(|| ProxyError::UnparseableChallenge(challenge_value.to_string()))?;

        challenge.realm = format!("https://{}/_token", self.proxy_fqdn);
        challenge.service = format!("https://{}", self.proxy_fqdn);

        let mut scope: ResourceScope = challenge.scope.parse()?;
        let remainder = scope
            .resource_name
            .strip_prefix(&item.remote_prefix)
            .unwrap_or(&scope.resource_name);
        scope.resource_name = slash_join(&item.local_prefix, remainder);
        challenge.scope = scope.to_string();

        Ok(challenge.to_string())
    }
}

/// Swap the local `/v2/{local_prefix}/` path root for the upstream's
/// `/v2/{remote_prefix}/`. The bare `/v2/` endpoint is left untouched.
pub(crate) fn rewrite_path(path: &str, item: &ProxyItem) -> String {
    let local = local_path(item);
    let remote = format!("/v2/{}/", item.remote_prefix.trim_matches('/'));

    if path != "/v2/" && path.starts_with(&local) {
        format!("{}{}", remote, &path[local.len()..])
    } else {
        path.to_string()
    }
}
