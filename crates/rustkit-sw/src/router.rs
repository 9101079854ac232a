//! Request classification.

use rustkit_net::{matches_any, Request, UrlPattern};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval strategy chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Network, falling back to cache; successful responses are written back.
    NetworkFirst,
    /// Cached copy now, refreshed from the network in the background.
    StaleWhileRevalidate,
    /// Network only; the cache is never read or written.
    NetworkOnly,
    /// Cache, falling back to the network without write-back.
    CacheFirst,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkOnly => "network-only",
            Strategy::CacheFirst => "cache-first",
        };
        f.write_str(name)
    }
}

/// URL patterns that drive classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Patterns identifying the application's main document.
    pub main_document: Vec<UrlPattern>,
    /// Trusted CDN hosts serving static assets.
    pub cdn: Vec<UrlPattern>,
    /// External read-only API hosts.
    pub api: Vec<UrlPattern>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            main_document: vec![UrlPattern::contains("index.html")],
            cdn: vec![
                UrlPattern::contains("unpkg.com"),
                UrlPattern::contains("cdnjs.cloudflare.com"),
            ],
            api: vec![UrlPattern::contains("api.github.com")],
        }
    }
}

impl RouteConfig {
    /// Pick the strategy for a request. First match wins:
    /// navigation or main document, CDN asset, API call, everything else.
    pub fn classify(&self, request: &Request) -> Strategy {
        let url = &request.url;
        if request.is_navigation() || matches_any(&self.main_document, url) {
            Strategy::NetworkFirst
        } else if matches_any(&self.cdn, url) {
            Strategy::StaleWhileRevalidate
        } else if matches_any(&self.api, url) {
            Strategy::NetworkOnly
        } else {
            Strategy::CacheFirst
        }
    }
}
