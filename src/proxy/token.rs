//! Token exchange proxying
//!
//! Clients request bearer tokens from the proxy's `/_token` endpoint. The
//! proxy rewrites the `scope` and `service` query parameters into the
//! upstream's namespace, forwards the request to the upstream token service
//! with the configured credentials, and re-wraps the returned token into an
//! opaque client-facing token before answering.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use axum::response::Response;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{ResourceScope, TokenCipher};
use crate::error::ProxyError;
use crate::proxy::discovery::TokenEndpoints;
use crate::proxy::matcher::ProxyTable;
use crate::proxy::{augment_user_agent, strip_connection_headers, strip_x_headers, TokenResponse};

/// Default token lifetime when the upstream response does not carry one.
const DEFAULT_EXPIRES_IN: i64 = 600;

/// Handles `/_token` requests end to end.
pub struct TokenProxy {
    table: Arc<ProxyTable>,
    endpoints: Arc<TokenEndpoints>,
    cipher: Arc<TokenCipher>,
    client: reqwest::Client,
    proxy_fqdn: String,
}

impl TokenProxy {
    pub fn new(
        table: Arc<ProxyTable>,
        endpoints: Arc<TokenEndpoints>,
        cipher: Arc<TokenCipher>,
        client: reqwest::Client,
        proxy_fqdn: String,
    ) -> Self {
        Self {
            table,
            endpoints,
            cipher,
            client,
            proxy_fqdn,
        }
    }

    /// Rewrite, forward, and re-wrap one token request.
    pub async fn exchange(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, _body) = req.into_parts();
        let (url, item_prefix) = self.rewrite(&parts.uri)?;
        self.forward(parts.method, url, parts.headers, &item_prefix)
            .await
    }

    /// Rewrite phase: turn the client's token request URL into the
    /// upstream's, with scope and service translated. Returns the upstream
    /// URL and the local prefix of the matched mapping.
    fn rewrite(&self, uri: &Uri) -> Result<(Url, String), ProxyError> {
        let query: Vec<(String, String)> = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        if !query.iter().any(|(k, _)| k == "service") {
            return Err(ProxyError::MissingParameter("service"));
        }
        let scope_param = query
            .iter()
            .find(|(k, _)| k == "scope")
            .map(|(_, v)| v.as_str())
            .ok_or(ProxyError::MissingParameter("scope"))?;

        let scope: ResourceScope = scope_param.parse()?;
        let item = self.table.best_match(&scope)?;
        let endpoint = self
            .endpoints
            .get(&item.registry_host)
            .ok_or_else(|| ProxyError::UnknownTokenEndpoint(item.registry_host.clone()))?;

        let mut rewritten = scope.clone();
        let remainder = scope
            .resource_name
            .strip_prefix(&item.local_prefix)
            .unwrap_or(&scope.resource_name);
        rewritten.resource_name = format!("{}/{}", item.remote_prefix, remainder)
            .trim_matches('/')
            .to_string();

        let mut url = Url::parse(&endpoint.realm).map_err(|e| {
            ProxyError::InvalidRewrite(format!("token endpoint realm {}: {}", endpoint.realm, e))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &query {
                if key != "service" && key != "scope" {
                    pairs.append_pair(key, value);
                }
            }
            pairs.append_pair("service", &endpoint.service);
            pairs.append_pair("scope", &rewritten.to_string());
        }

        info!(from = %scope, to = %rewritten, "rewrote scope in token request");
        Ok((url, item.local_prefix.clone()))
    }

    /// Forward phase: call the upstream token service with the configured
    /// credentials and replace the returned token with a wrapped one.
    async fn forward(
        &self,
        method: Method,
        url: Url,
        mut headers: HeaderMap,
        local_prefix: &str,
    ) -> Result<Response, ProxyError> {
        let item = self
            .table
            .get(local_prefix)
            .ok_or_else(|| ProxyError::NoMatchingProxy(local_prefix.to_string()))?;

        // The client never authenticates to the proxy; whatever credential
        // it sent is discarded in favor of the configured one.
        if headers.contains_key(header::AUTHORIZATION) {
            warn!("received an Authorization header from the client on the token endpoint");
        }
        let auth = HeaderValue::from_str(&item.auth_header).map_err(|_| {
            ProxyError::InvalidRewrite("configured auth header is not a valid header value".into())
        })?;
        headers.insert(header::AUTHORIZATION, auth);

        strip_connection_headers(&mut headers);
        augment_user_agent(&mut headers, &self.proxy_fqdn);
        strip_x_headers(&mut headers);

        debug!(method = %method, url = %url, "forwarding token request upstream");
        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let mut resp_headers = response.headers().clone();
        debug!(status = status.as_u16(), "upstream token service responded");

        let content_type = resp_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("application/json") {
            return Err(ProxyError::TokenResponse(format!(
                "expected content type application/json, got {:?}",
                content_type
            )));
        }

        let mut token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::TokenResponse(format!("failed to decode body: {}", e)))?;

        if token_response.token.is_empty() {
            return Err(ProxyError::TokenResponse(
                "no token found in upstream response".to_string(),
            ));
        }

        let now = Utc::now();
        let issued_at = token_response.issued_at.unwrap_or_else(|| {
            debug!("upstream token had no issued_at value, using now");
            now
        });
        if token_response.expires_in == 0 {
            debug!(
                expires_in = DEFAULT_EXPIRES_IN,
                "upstream token had no expires_in value, using default"
            );
            token_response.expires_in = DEFAULT_EXPIRES_IN;
        }
        let expires_at = issued_at + Duration::seconds(token_response.expires_in);

        token_response.token = self.cipher.seal(&token_response.token, now, expires_at)?;
        token_response.issued_at = Some(issued_at);

        // The upstream body is never forwarded verbatim once it carried a
        // token; it is always replaced with the re-encoded form.
        let payload = serde_json::to_vec(&token_response)
            .map_err(|e| ProxyError::TokenResponse(format!("failed to encode body: {}", e)))?;

        resp_headers.remove(header::CONTENT_LENGTH);
        resp_headers.remove(header::TRANSFER_ENCODING);
        resp_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let mut response = Response::new(Body::from(payload));
        *response.status_mut() = status;
        *response.headers_mut() = resp_headers;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{BearerChallenge, SecretKey};
    use crate::config::{Config, ProxyItem};
    use axum::http::StatusCode;
    use wiremock::matchers::{header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUTH_HEADER: &str = "Basic dXNlcjpwYXNz";

    fn test_cipher() -> Arc<TokenCipher> {
        Arc::new(TokenCipher::new(
            &SecretKey::from_hex(&"ab".repeat(32)).unwrap(),
        ))
    }

    fn proxy_for(mock_server: &MockServer, local: &str, remote: &str) -> TokenProxy {
        let item = ProxyItem {
            registry_host: mock_server.uri(),
            remote_prefix: remote.to_string(),
            auth_header: AUTH_HEADER.to_string(),
            local_prefix: local.to_string(),
        };
        let config = Config {
            proxies: [(local.to_string(), item)].into_iter().collect(),
            ..Config::default()
        };
        let endpoints: TokenEndpoints = [(
            mock_server.uri(),
            BearerChallenge {
                realm: format!("{}/token", mock_server.uri()),
                service: "registry.docker.io".to_string(),
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();

        TokenProxy::new(
            Arc::new(ProxyTable::new(&config)),
            Arc::new(endpoints),
            test_cipher(),
            crate::proxy::upstream_client(),
            "registry.example.com".to_string(),
        )
    }

    fn token_request(query: &str) -> Request {
        Request::builder()
            .uri(format!("/_token{}", query))
            .body(Body::empty())
            .unwrap()
    }

    async fn response_body(response: Response) -> TokenResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    // Test 1: The upstream receives the rewritten scope, service and credentials
    #[tokio::test]
    async fn test_scope_rewrite_on_token_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("scope", "repository:someuser/app:pull"))
            .and(query_param("service", "registry.docker.io"))
            .and(header_matcher("Authorization", AUTH_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "UPSTREAM_XYZ",
                "expires_in": 300,
                "issued_at": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let request = token_request(
            "?service=registry.example.com&scope=repository%3Amyorg%2Fapp%3Apull",
        );

        let response = proxy.exchange(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Test 2: The returned token unwraps to the upstream token with the
    // upstream-derived expiration
    #[tokio::test]
    async fn test_token_wrap() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "UPSTREAM_XYZ",
                "expires_in": 300,
                "issued_at": "2024-01-01T00:00:00Z"
            })))
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let response = proxy
            .exchange(token_request(
                "?service=registry.example.com&scope=repository:myorg/app:pull",
            ))
            .await
            .unwrap();

        let body = response_body(response).await;
        assert_ne!(body.token, "UPSTREAM_XYZ");
        assert_eq!(body.expires_in, 300);
        assert_eq!(
            body.issued_at,
            Some("2024-01-01T00:00:00Z".parse().unwrap())
        );

        let cipher = test_cipher();
        let claims = cipher.open_claims(&body.token).unwrap();
        assert_eq!(claims.upstream_token.as_deref(), Some("UPSTREAM_XYZ"));
        assert_eq!(
            claims.exp,
            "2024-01-01T00:05:00Z"
                .parse::<chrono::DateTime<Utc>>()
                .unwrap()
                .timestamp()
        );
    }

    // Test 3: Missing issued_at and expires_in fall back to now and 600s
    #[tokio::test]
    async fn test_token_defaults() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "token": "UPSTREAM_XYZ" })),
            )
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let before = Utc::now();
        let response = proxy
            .exchange(token_request(
                "?service=registry.example.com&scope=repository:myorg/app:pull",
            ))
            .await
            .unwrap();

        let body = response_body(response).await;
        assert_eq!(body.expires_in, 600);
        let issued_at = body.issued_at.unwrap();
        assert!(issued_at >= before - Duration::seconds(1));
        assert!(issued_at <= Utc::now() + Duration::seconds(1));

        // The wrapped token is immediately usable
        assert_eq!(test_cipher().open(&body.token).unwrap(), "UPSTREAM_XYZ");
    }

    // Test 4: Missing service or scope parameters abort the exchange
    #[tokio::test]
    async fn test_missing_parameters() {
        let mock_server = MockServer::start().await;
        let proxy = proxy_for(&mock_server, "myorg", "someuser");

        let result = proxy
            .exchange(token_request("?scope=repository:myorg/app:pull"))
            .await;
        assert!(matches!(result, Err(ProxyError::MissingParameter("service"))));

        let result = proxy
            .exchange(token_request("?service=registry.example.com"))
            .await;
        assert!(matches!(result, Err(ProxyError::MissingParameter("scope"))));
    }

    // Test 5: An unparseable scope aborts the exchange
    #[tokio::test]
    async fn test_invalid_scope() {
        let mock_server = MockServer::start().await;
        let proxy = proxy_for(&mock_server, "myorg", "someuser");

        let result = proxy
            .exchange(token_request("?service=x&scope=not%20a%20scope"))
            .await;
        assert!(matches!(result, Err(ProxyError::Scope(_))));
    }

    // Test 6: A scope outside every configured namespace aborts the exchange
    #[tokio::test]
    async fn test_no_matching_proxy() {
        let mock_server = MockServer::start().await;
        let proxy = proxy_for(&mock_server, "myorg", "someuser");

        let result = proxy
            .exchange(token_request("?service=x&scope=repository:other/app:pull"))
            .await;
        assert!(matches!(result, Err(ProxyError::NoMatchingProxy(_))));
    }

    // Test 7: An upstream response without a token is an error
    #[tokio::test]
    async fn test_upstream_response_without_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "error": "access denied" })),
            )
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let result = proxy
            .exchange(token_request("?service=x&scope=repository:myorg/app:pull"))
            .await;
        assert!(matches!(result, Err(ProxyError::TokenResponse(_))));
    }

    // Test 8: A non-JSON upstream response is an error
    #[tokio::test]
    async fn test_upstream_response_not_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let result = proxy
            .exchange(token_request("?service=x&scope=repository:myorg/app:pull"))
            .await;
        assert!(matches!(result, Err(ProxyError::TokenResponse(_))));
    }

    // Test 9: An unreachable token service surfaces a transport error
    #[tokio::test]
    async fn test_upstream_unavailable() {
        let mock_server = MockServer::start().await;
        let mut proxy = proxy_for(&mock_server, "myorg", "someuser");
        proxy.endpoints = Arc::new(
            [(
                mock_server.uri(),
                BearerChallenge {
                    realm: "http://127.0.0.1:1/token".to_string(),
                    service: "registry.docker.io".to_string(),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
        );

        let result = proxy
            .exchange(token_request("?service=x&scope=repository:myorg/app:pull"))
            .await;
        assert!(matches!(result, Err(ProxyError::Upstream(_))));
    }

    // Test 10: Client credentials and X- headers never reach the upstream,
    // and the User-Agent is augmented
    #[tokio::test]
    async fn test_request_hygiene() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header_matcher("Authorization", AUTH_HEADER))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "token": "UPSTREAM_XYZ" })),
            )
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        let request = Request::builder()
            .uri("/_token?service=x&scope=repository:myorg/app:pull")
            .header("Authorization", "Bearer client-supplied")
            .header("X-Forwarded-For", "10.0.0.1")
            .header("User-Agent", "docker/24.0.5")
            .body(Body::empty())
            .unwrap();

        proxy.exchange(request).await.unwrap();

        let received = &mock_server.received_requests().await.unwrap()[0];
        assert!(!received.headers.contains_key("x-forwarded-for"));
        let ua = received.headers.get("user-agent").unwrap().to_str().unwrap();
        assert!(ua.starts_with("registryproxy/"));
        assert!(ua.contains("customDomain/registry.example.com"));
        assert!(ua.ends_with("docker/24.0.5"));
    }

    // Test 11: Exact-prefix scopes map to the bare remote prefix
    #[tokio::test]
    async fn test_exact_prefix_scope_rewrite() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("scope", "repository:someuser:pull"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "token": "UPSTREAM_XYZ" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let proxy = proxy_for(&mock_server, "myorg", "someuser");
        proxy
            .exchange(token_request("?service=x&scope=repository:myorg:pull"))
            .await
            .unwrap();
    }
}
