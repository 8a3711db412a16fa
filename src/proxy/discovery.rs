//! Startup discovery of upstream token endpoints
//!
//! Each upstream registry advertises its token service in the
//! `WWW-Authenticate` challenge returned by `GET /v2/`. Discovery runs once
//! at boot, one probe per unique registry host; the resulting map is
//! read-only for the life of the process.

use std::collections::HashMap;

use axum::http::header;
use tracing::{debug, info};

use crate::auth::BearerChallenge;
use crate::config::Config;
use crate::error::DiscoveryError;

/// Token endpoints keyed by registry host, populated once at boot.
#[derive(Debug, Clone, Default)]
pub struct TokenEndpoints {
    endpoints: HashMap<String, BearerChallenge>,
}

impl TokenEndpoints {
    /// Probe every unique registry host in the configuration. Any failure
    /// aborts startup.
    pub async fn discover(
        client: &reqwest::Client,
        config: &Config,
    ) -> Result<Self, DiscoveryError> {
        let mut endpoints = HashMap::new();

        for item in config.proxies.values() {
            if endpoints.contains_key(&item.registry_host) {
                continue;
            }
            let url = format!("{}/v2/", item.registry_url());
            let endpoint = probe_token_endpoint(client, &item.registry_host, &url).await?;
            info!(
                registry = %item.registry_host,
                realm = %endpoint.realm,
                service = %endpoint.service,
                "discovered token endpoint"
            );
            endpoints.insert(item.registry_host.clone(), endpoint);
        }

        Ok(Self { endpoints })
    }

    pub fn get(&self, registry_host: &str) -> Option<&BearerChallenge> {
        self.endpoints.get(registry_host)
    }
}

impl FromIterator<(String, BearerChallenge)> for TokenEndpoints {
    fn from_iter<I: IntoIterator<Item = (String, BearerChallenge)>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

/// Fetch the `/v2/` endpoint of a registry and parse the challenge header.
async fn probe_token_endpoint(
    client: &reqwest::Client,
    registry_host: &str,
    url: &str,
) -> Result<BearerChallenge, DiscoveryError> {
    debug!(url = %url, "probing registry for its token endpoint");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| DiscoveryError::Unreachable {
            host: registry_host.to_string(),
            source,
        })?;

    let header_value = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| DiscoveryError::MissingChallenge(url.to_string()))?;

    BearerChallenge::parse(header_value).ok_or_else(|| DiscoveryError::UnparseableChallenge {
        host: registry_host.to_string(),
        header: header_value.to_string(),
    })
}
