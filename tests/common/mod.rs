//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use registry_proxy::auth::{SecretKey, TokenCipher};
use registry_proxy::config::{Config, ProxyItem};
use registry_proxy::proxy::{
    upstream_client, ProxyTable, RegistryProxy, TokenEndpoints, TokenProxy,
};
use registry_proxy::server::AppState;

/// Hex secret key shared by all integration tests
pub const SECRET_KEY_HEX: &str =
    "abababababababababababababababababababababababababababababababab";

/// Public hostname the proxy advertises in rewritten headers
pub const PROXY_FQDN: &str = "registry.example.com";

/// Authorization header configured for the upstream token service
pub const UPSTREAM_AUTH: &str = "Basic dXNlcjpwYXNz";

/// Create a configuration with a single upstream mapping pointing at the
/// given registry URL (normally a wiremock server)
pub fn create_test_config(registry_url: &str, local: &str, remote: &str) -> Config {
    let item = ProxyItem {
        registry_host: registry_url.to_string(),
        remote_prefix: remote.to_string(),
        auth_header: UPSTREAM_AUTH.to_string(),
        local_prefix: local.to_string(),
    };
    Config {
        listen_addr: "127.0.0.1".to_string(),
        listen_port: Some(0),
        proxy_fqdn: PROXY_FQDN.to_string(),
        secret_key: SECRET_KEY_HEX.to_string(),
        log_level: String::new(),
        proxies: [(local.to_string(), item)].into_iter().collect(),
    }
}

/// The token cipher every test component shares
pub fn create_test_cipher() -> Arc<TokenCipher> {
    Arc::new(TokenCipher::new(&SecretKey::from_hex(SECRET_KEY_HEX).unwrap()))
}

/// Create application state, running real token-endpoint discovery against
/// the configured upstream
pub async fn create_test_state(config: Config) -> AppState {
    let client = upstream_client();
    let endpoints = Arc::new(
        TokenEndpoints::discover(&client, &config)
            .await
            .expect("token endpoint discovery failed"),
    );

    let cipher = create_test_cipher();
    let table = Arc::new(ProxyTable::new(&config));
    let config = Arc::new(config);

    AppState {
        config: Arc::clone(&config),
        table: Arc::clone(&table),
        token_proxy: Arc::new(TokenProxy::new(
            table,
            endpoints,
            Arc::clone(&cipher),
            client.clone(),
            config.proxy_fqdn.clone(),
        )),
        registry_proxy: Arc::new(RegistryProxy::new(
            cipher,
            client,
            config.proxy_fqdn.clone(),
        )),
    }
}

/// Run a test server in the background and return its address.
/// The server shuts down when the returned sender is dropped or sent.
pub async fn run_test_server(
    state: AppState,
) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let app = registry_proxy::server::build_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    // Give the server a moment to start (100ms is sufficient for slow CI systems)
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    (addr, shutdown_tx)
}

/// HTTP client for talking to the proxy under test; never follows
/// redirects so Location headers can be asserted
pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
