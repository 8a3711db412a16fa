//! Upstream selection
//!
//! Maps an incoming scope or URL path to the configured upstream. Local
//! prefixes without a trailing slash are fully-qualified repository names
//! and match exactly; those with a trailing slash are namespace roots under
//! which any sub-repository matches.

use std::collections::HashMap;

use crate::auth::ResourceScope;
use crate::config::{Config, ProxyItem};
use crate::error::ProxyError;

/// The set of configured upstream mappings, keyed by local prefix.
#[derive(Debug, Clone)]
pub struct ProxyTable {
    items: HashMap<String, ProxyItem>,
}

impl ProxyTable {
    pub fn new(config: &Config) -> Self {
        Self {
            items: config.proxies.clone(),
        }
    }

    /// Find the upstream mapping for the given scope.
    ///
    /// An exact match on the resource name wins. Otherwise, among the
    /// trailing-slash prefixes that prefix the resource name, the longest
    /// one wins.
    pub fn best_match(&self, scope: &ResourceScope) -> Result<&ProxyItem, ProxyError> {
        if let Some(exact) = self.items.get(&scope.resource_name) {
            return Ok(exact);
        }

        self.items
            .values()
            .filter(|item| {
                item.local_prefix.ends_with('/')
                    && scope.resource_name.starts_with(&item.local_prefix)
            })
            .max_by_key(|item| item.local_prefix.len())
            .ok_or_else(|| ProxyError::NoMatchingProxy(scope.resource_name.clone()))
    }

    /// Find the upstream mapping whose `/v2/{local_prefix}/` path is a
    /// prefix of the given request path. The longest match wins.
    pub fn match_path(&self, path: &str) -> Option<&ProxyItem> {
        self.items
            .values()
            .filter(|item| path.starts_with(&local_path(item)))
            .max_by_key(|item| item.local_prefix.len())
    }

    /// Look up a mapping by its exact local prefix.
    pub fn get(&self, local_prefix: &str) -> Option<&ProxyItem> {
        self.items.get(local_prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Client-facing path root for an upstream mapping, e.g. `/v2/myorg/`.
pub(crate) fn local_path(item: &ProxyItem) -> String {
    format!("/v2/{}/", item.local_prefix.trim_matches('/'))
}
