//! Worker configuration.
//!
//! Everything that used to be a build-time constant of the worker script
//! (cache generation, version, manifest, routing patterns) lives here so that
//! several generations can be constructed side by side.

use crate::router::RouteConfig;
use crate::ServiceWorkerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default cache generation identifier.
pub const DEFAULT_GENERATION: &str = "app-shell-v1.0.0";

/// Default version string announced to pages.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Default periodic sync tag for update checks.
pub const DEFAULT_UPDATE_TAG: &str = "check-updates";

const DEFAULT_SCOPE: &str = "http://localhost/";

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache generation identifier; names the cache this version owns.
    /// Bump it whenever the manifest or cached contents change.
    pub generation: String,

    /// Version string broadcast to pages after activation.
    pub version: String,

    /// Worker scope. Relative manifest entries resolve against it.
    pub scope: Url,

    /// Resources pre-cached at install time.
    pub manifest: Vec<String>,

    /// Request classification patterns.
    pub routes: RouteConfig,

    /// Periodic sync tag that triggers an update check.
    pub update_tag: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            generation: DEFAULT_GENERATION.to_string(),
            version: DEFAULT_VERSION.to_string(),
            scope: Url::parse(DEFAULT_SCOPE).expect("default scope is a valid URL"),
            manifest: vec![
                "./index.html".to_string(),
                "https://unpkg.com/tailwindcss-cdn@3.4.10/tailwindcss.js".to_string(),
                "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css"
                    .to_string(),
            ],
            routes: RouteConfig::default(),
            update_tag: DEFAULT_UPDATE_TAG.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration for one generation with default manifest and routes.
    pub fn new(generation: impl Into<String>, version: impl Into<String>, scope: Url) -> Self {
        Self {
            generation: generation.into(),
            version: version.into(),
            scope,
            ..Default::default()
        }
    }

    /// Replace the manifest.
    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid worker config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Check invariants the lifecycle relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.generation.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache generation must not be empty".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "version must not be empty".to_string(),
            ));
        }
        self.resolved_manifest().map(|_| ())
    }

    /// Manifest entries resolved against the scope, in declaration order.
    pub fn resolved_manifest(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.manifest
            .iter()
            .map(|entry| {
                let url = self.scope.join(entry).map_err(|e| {
                    ServiceWorkerError::Config(format!("invalid manifest entry '{}': {}", entry, e))
                })?;
                match url.scheme() {
                    "http" | "https" => Ok(url),
                    scheme => Err(ServiceWorkerError::Config(format!(
                        "manifest entry '{}' uses unsupported scheme '{}'",
                        entry, scheme
                    ))),
                }
            })
            .collect()
    }
}
