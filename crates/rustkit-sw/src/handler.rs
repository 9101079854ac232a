//! Lifecycle handler interface.
//!
//! The platform drives a worker through five events. Each is one method on
//! [`LifecycleHandler`], given a [`WorkerContext`] with handles to everything
//! the worker may touch, and returns a typed outcome.

use crate::background::BackgroundTask;
use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::router::Strategy;
use crate::{CacheError, ServiceWorkerError, ServiceWorkerId};
use async_trait::async_trait;
use rustkit_net::{Fetcher, Request, Response};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Registration handle for one worker version.
#[async_trait]
pub trait Registration: Send + Sync {
    /// Let this version activate without waiting for controlled pages to close.
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError>;

    /// Ask the platform to check the worker script for changes.
    async fn update(&self) -> Result<(), ServiceWorkerError>;
}

/// Everything a handler may touch while processing an event.
#[derive(Clone)]
pub struct WorkerContext {
    /// Identity of the worker version handling the event.
    pub worker_id: ServiceWorkerId,
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Fetcher>,
    pub clients: Arc<dyn Clients>,
    pub registration: Arc<dyn Registration>,
}

impl WorkerContext {
    pub fn new(
        worker_id: ServiceWorkerId,
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
        clients: Arc<dyn Clients>,
        registration: Arc<dyn Registration>,
    ) -> Self {
        Self {
            worker_id,
            caches,
            network,
            clients,
            registration,
        }
    }
}

// ==================== Events ====================

/// A request issued by a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request }
    }
}

/// A message posted by a page.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self { data }
    }
}

/// A platform-scheduled periodic trigger.
#[derive(Debug, Clone)]
pub struct PeriodicSyncEvent {
    pub tag: String,
}

impl PeriodicSyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

// ==================== Outcomes ====================

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Cache populated by the install.
    pub cache: String,
    /// Number of manifest resources stored.
    pub cached: usize,
}

/// Result of an activation.
#[derive(Debug, Default)]
pub struct ActivateOutcome {
    /// Stale caches that were deleted.
    pub deleted: Vec<String>,
    /// Stale caches whose deletion failed; activation carried on regardless.
    pub failed_deletions: Vec<(String, CacheError)>,
    /// Clients claimed.
    pub claimed: usize,
    /// Clients that received the update notification.
    pub notified: usize,
}

/// Where a fetch response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// Response produced for a fetch event.
#[derive(Debug)]
pub struct FetchOutcome {
    pub response: Response,
    pub strategy: Strategy,
    pub source: ResponseSource,
    /// Background refresh started for a cached answer, if any.
    pub revalidation: Option<BackgroundTask>,
}

impl FetchOutcome {
    pub fn from_network(strategy: Strategy, response: Response) -> Self {
        Self {
            response,
            strategy,
            source: ResponseSource::Network,
            revalidation: None,
        }
    }

    pub fn from_cache(strategy: Strategy, response: Response) -> Self {
        Self {
            response,
            strategy,
            source: ResponseSource::Cache,
            revalidation: None,
        }
    }

    pub fn with_revalidation(mut self, task: BackgroundTask) -> Self {
        self.revalidation = Some(task);
        self
    }
}

/// What a page message caused.
#[derive(Debug)]
pub enum MessageOutcome {
    /// The worker asked to skip the waiting phase.
    SkipWaiting,
    /// An update check was started.
    UpdateCheck(BackgroundTask),
    /// Unrecognised message; nothing happened.
    Ignored,
}

/// What a periodic trigger caused.
#[derive(Debug)]
pub enum SyncOutcome {
    /// An update check was started.
    UpdateCheck(BackgroundTask),
    /// Unrecognised tag; nothing happened.
    Ignored,
}

/// One method per lifecycle event.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Cache generation this handler owns.
    fn generation(&self) -> &str;

    /// Prepare the worker's cache. Failure leaves the version uninstalled.
    async fn on_install(&self, ctx: &WorkerContext) -> Result<InstallOutcome, ServiceWorkerError>;

    /// Take over from the previous version.
    async fn on_activate(&self, ctx: &WorkerContext)
        -> Result<ActivateOutcome, ServiceWorkerError>;

    /// Produce a response for a request.
    async fn on_fetch(
        &self,
        ctx: &WorkerContext,
        event: FetchEvent,
    ) -> Result<FetchOutcome, ServiceWorkerError>;

    /// Handle a page message.
    async fn on_message(
        &self,
        ctx: &WorkerContext,
        event: MessageEvent,
    ) -> Result<MessageOutcome, ServiceWorkerError>;

    /// Handle a periodic trigger.
    async fn on_periodic_sync(
        &self,
        ctx: &WorkerContext,
        event: PeriodicSyncEvent,
    ) -> Result<SyncOutcome, ServiceWorkerError>;
}
