//! registry-proxy - a reverse proxy for OCI/Docker container registries
//!
//! This crate fronts one or more upstream registries under a single
//! canonical host. It rewrites the URL namespace between a short local
//! prefix and each upstream's remote prefix, and proxies the Docker
//! Registry v2 bearer-token handshake: the proxy authenticates to
//! upstreams with configured credentials and issues its own opaque tokens
//! to clients, with the upstream token sealed inside.

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
