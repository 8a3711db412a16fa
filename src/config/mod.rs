//! Configuration management for registry-proxy
//!
//! This module handles loading, parsing, and validating application
//! configuration from YAML files and environment variables.

use std::collections::HashMap;
use std::path::Path;

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::auth::token::SecretKey;

/// Default listen address when neither config nor environment provide one.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

/// Default listen port when neither config nor environment provide one.
const DEFAULT_LISTEN_PORT: u16 = 5000;

/// One configured upstream mapping.
///
/// `local_prefix` is the namespace the proxy exposes to clients and is set
/// from the key the item appears under in the `proxies` map; it is not read
/// from the item body itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyItem {
    /// Upstream registry host, e.g. `registry-1.docker.io`. A full URL is
    /// also accepted; a bare host implies `https`.
    #[serde(rename = "registry")]
    pub registry_host: String,

    /// Namespace on the upstream that `local_prefix` maps to
    #[serde(rename = "remote")]
    pub remote_prefix: String,

    /// Pre-formed Authorization header value used against the upstream
    /// token service
    #[serde(rename = "auth")]
    pub auth_header: String,

    /// Client-facing namespace; always equals the `proxies` map key
    #[serde(skip)]
    pub local_prefix: String,
}

impl ProxyItem {
    /// Base URL of the upstream registry.
    pub fn registry_url(&self) -> String {
        if self.registry_host.contains("://") {
            self.registry_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.registry_host)
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Address to bind to; empty means `LISTEN_ADDR` or 0.0.0.0
    #[serde(default)]
    pub listen_addr: String,

    /// Port to listen on; absent means `LISTEN_PORT` or 5000
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// Canonical public hostname advertised in rewritten headers
    #[serde(default)]
    pub proxy_fqdn: String,

    /// Hex-encoded 32-byte symmetric key for the token cipher
    #[serde(default)]
    pub secret_key: String,

    /// Log level: DEBUG, INFO, WARN or ERROR
    #[serde(default)]
    pub log_level: String,

    /// Upstream mappings keyed by local prefix
    #[serde(default)]
    pub proxies: HashMap<String, ProxyItem>,
}

impl Config {
    /// Load, resolve and validate configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_fallbacks()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// `${VAR}` references are expanded from the environment before
    /// parsing. The result is not yet resolved or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Fill empty listen fields from `LISTEN_ADDR` / `LISTEN_PORT`, falling
    /// back to the built-in defaults.
    fn apply_env_fallbacks(&mut self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            self.listen_addr = std::env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        }
        if self.listen_port.is_none() {
            self.listen_port = match std::env::var("LISTEN_PORT") {
                Ok(port) => Some(port.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("LISTEN_PORT is not a port number: {}", port))
                })?),
                Err(_) => Some(DEFAULT_LISTEN_PORT),
            };
        }
        Ok(())
    }

    /// Enforce the configuration invariants and stamp each `ProxyItem`
    /// with its map key as `local_prefix`.
    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.proxy_fqdn.is_empty() {
            return Err(ConfigError::MissingRequired("proxy_fqdn".to_string()));
        }
        if self.secret_key.is_empty() {
            return Err(ConfigError::MissingRequired("secret_key".to_string()));
        }
        SecretKey::from_hex(&self.secret_key)
            .map_err(|e| ConfigError::InvalidValue(format!("secret_key: {}", e)))?;

        if !self.log_level.is_empty()
            && !matches!(
                self.log_level.to_uppercase().as_str(),
                "DEBUG" | "INFO" | "WARN" | "ERROR"
            )
        {
            return Err(ConfigError::InvalidValue(format!(
                "log_level must be DEBUG, INFO, WARN or ERROR, got {}",
                self.log_level
            )));
        }

        for (name, item) in self.proxies.iter_mut() {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "proxies contains an empty key".to_string(),
                ));
            }
            if item.registry_host.is_empty() {
                return Err(ConfigError::MissingRequired(format!(
                    "proxies.{}.registry",
                    name
                )));
            }
            if item.remote_prefix.is_empty() {
                return Err(ConfigError::MissingRequired(format!(
                    "proxies.{}.remote",
                    name
                )));
            }
            if HeaderValue::from_str(&item.auth_header).is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "proxies.{}.auth is not a valid header value",
                    name
                )));
            }
            item.local_prefix = name.clone();
        }

        Ok(())
    }

    /// Resolved listen port. Only meaningful after a successful load.
    pub fn listen_port(&self) -> u16 {
        self.listen_port.unwrap_or(DEFAULT_LISTEN_PORT)
    }

    /// Log the resolved configuration. Auth header values are redacted.
    pub fn log_summary(&self) {
        tracing::info!(
            listen_addr = %self.listen_addr,
            listen_port = self.listen_port(),
            proxy_fqdn = %self.proxy_fqdn,
            proxies = self.proxies.len(),
            "running configuration"
        );
        for (name, item) in &self.proxies {
            let auth = if item.auth_header.is_empty() {
                "(none)"
            } else {
                "(redacted)"
            };
            tracing::info!(
                local = %name,
                registry = %item.registry_host,
                remote = %item.remote_prefix,
                auth,
                "configured proxy"
            );
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
