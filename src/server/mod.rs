//! HTTP server components for registry-proxy
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - Request logging and panic recovery middleware
//! - Server lifecycle management

pub mod middleware;
pub mod router;

pub use router::{build_router, AppState, HealthResponse};

use std::future::Future;
use std::net::SocketAddr;

use axum::middleware::from_fn;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// HTTP server for registry-proxy
///
/// Manages the axum server lifecycle, including:
/// - Binding to the configured address
/// - Applying middleware layers
/// - Graceful shutdown handling
pub struct Server {
    addr: String,
    port: u16,
    state: AppState,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config, state: AppState) -> Self {
        Self {
            addr: config.listen_addr.clone(),
            port: config.listen_port(),
            state,
        }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr.parse().unwrap_or([0, 0, 0, 0].into()), self.port)
    }

    /// Run the server until the shutdown future resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr();

        let app = build_router(self.state)
            .layer(from_fn(middleware::logging_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(middleware::handle_panic));

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),
}
