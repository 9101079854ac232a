//! # RustKit Service Workers
//!
//! App-shell service worker for single-page applications running on RustKit.
//!
//! ## Features
//!
//! - **Lifecycle**: install (manifest pre-cache), activate (stale cache
//!   eviction, client claim, update notification)
//! - **Fetch routing**: network-first, stale-while-revalidate, network-only
//!   and cache-first strategies keyed by request classification
//! - **Control channel**: `SKIP_WAITING` / `CHECK_UPDATE` page messages and
//!   periodic update checks
//! - **Pluggable platform**: cache storage, network, clients and registration
//!   are traits with in-memory implementations
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host)
//!     ├── installing / waiting / active slots
//!     │       └── LifecycleHandler (AppShellWorker)
//!     │               └── WorkerContext
//!     │                       ├── CacheStorage   (generation-named caches)
//!     │                       ├── Fetcher        (network)
//!     │                       ├── Clients        (controlled pages)
//!     │                       └── Registration   (skip waiting, update)
//!     └── ServiceWorkerEvent channel
//! ```

use rustkit_common::RustKitError;
use rustkit_net::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod background;
pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod handler;
pub mod messages;
pub mod router;
pub mod strategy;
pub mod worker;

pub use background::BackgroundTask;
pub use cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, ClientId, ClientMatchOptions, ClientRegistry, ClientType, Clients};
pub use config::WorkerConfig;
pub use container::{FetchResult, ServiceWorkerContainer, ServiceWorkerEvent, WorkerInfo};
pub use handler::{
    ActivateOutcome, FetchEvent, FetchOutcome, InstallOutcome, LifecycleHandler, MessageEvent,
    MessageOutcome, PeriodicSyncEvent, Registration, ResponseSource, SyncOutcome, WorkerContext,
};
pub use messages::{ClientMessage, ControlMessage};
pub use router::{RouteConfig, Strategy};
pub use worker::AppShellWorker;

// ==================== Errors ====================

/// Errors raised by a cache storage backend.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Request method '{0}' is unsupported")]
    UnsupportedMethod(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Failed to pre-cache {resource}: {reason}")]
    Install { resource: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("No response available for {url}")]
    NoResponse { url: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("State error: {0}")]
    State(String),
}

impl From<ServiceWorkerError> for RustKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(e) => {
                RustKitError::network_with_source("network request failed", e)
            }
            ServiceWorkerError::Cache(e) => {
                RustKitError::cache_with_source("cache operation failed", e)
            }
            ServiceWorkerError::Config(message) => RustKitError::config(message),
            other => RustKitError::worker_with_source("service worker operation failed", other),
        }
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Initial state, script being parsed.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

impl ServiceWorkerState {
    /// Whether fetch events are routed to a worker in this state.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, Self::Activating | Self::Activated)
    }
}
