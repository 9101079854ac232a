//! The app-shell worker.

use crate::background::BackgroundTask;
use crate::clients::ClientMatchOptions;
use crate::config::WorkerConfig;
use crate::handler::{
    ActivateOutcome, FetchEvent, FetchOutcome, InstallOutcome, LifecycleHandler, MessageEvent,
    MessageOutcome, PeriodicSyncEvent, SyncOutcome, WorkerContext,
};
use crate::messages::{ClientMessage, ControlMessage};
use crate::router::Strategy;
use crate::strategy;
use crate::ServiceWorkerError;
use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use rustkit_net::{Request, RequestMode, Response};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Service worker for a single-page application shell.
///
/// Pre-caches a fixed manifest, evicts caches of older generations on
/// activation and routes requests to one of four strategies.
#[derive(Debug, Clone)]
pub struct AppShellWorker {
    config: WorkerConfig,
}

impl AppShellWorker {
    /// Create a worker from a validated configuration.
    pub fn new(config: WorkerConfig) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn manifest_request(&self, url: Url) -> Request {
        let mode = if url.origin() == self.config.scope.origin() {
            RequestMode::SameOrigin
        } else {
            RequestMode::Cors
        };
        Request::get(url).mode(mode)
    }

    async fn precache_fetch(
        ctx: &WorkerContext,
        request: Request,
    ) -> Result<(Request, Response), ServiceWorkerError> {
        let response = ctx
            .network
            .fetch(&request)
            .await
            .map_err(|e| ServiceWorkerError::Install {
                resource: request.url.to_string(),
                reason: e.to_string(),
            })?;
        if !response.ok() {
            return Err(ServiceWorkerError::Install {
                resource: request.url.to_string(),
                reason: format!("unexpected status {}", response.status),
            });
        }
        Ok((request, response))
    }

    fn spawn_update_check(ctx: &WorkerContext, trigger: &'static str) -> BackgroundTask {
        let registration = Arc::clone(&ctx.registration);
        BackgroundTask::spawn("update-check", async move {
            registration.update().await?;
            info!(trigger, "Update check verified");
            Ok::<(), ServiceWorkerError>(())
        })
    }
}

#[async_trait]
impl LifecycleHandler for AppShellWorker {
    fn generation(&self) -> &str {
        &self.config.generation
    }

    async fn on_install(&self, ctx: &WorkerContext) -> Result<InstallOutcome, ServiceWorkerError> {
        let cache = self.config.generation.as_str();
        info!(version = %self.config.version, cache = %cache, "Installing service worker");

        let requests: Vec<Request> = self
            .config
            .resolved_manifest()?
            .into_iter()
            .map(|url| self.manifest_request(url))
            .collect();

        info!(cache = %cache, resources = requests.len(), "Caching essential resources");

        // All fetches must succeed before the cache is created.
        let fetched =
            try_join_all(requests.into_iter().map(|r| Self::precache_fetch(ctx, r))).await?;
        ctx.caches.open(cache).await?;
        for (request, response) in &fetched {
            ctx.caches.put(cache, request, response).await?;
        }

        ctx.registration.skip_waiting().await?;
        info!(cache = %cache, cached = fetched.len(), "Install complete");

        Ok(InstallOutcome {
            cache: cache.to_string(),
            cached: fetched.len(),
        })
    }

    async fn on_activate(
        &self,
        ctx: &WorkerContext,
    ) -> Result<ActivateOutcome, ServiceWorkerError> {
        let current = self.config.generation.as_str();
        info!(version = %self.config.version, cache = %current, "Activating service worker");

        let stale: Vec<String> = ctx
            .caches
            .keys()
            .await?
            .into_iter()
            .filter(|name| name != current)
            .collect();

        // Each deletion fails on its own; none of them blocks the claim.
        let deletions = stale.into_iter().map(|name| async move {
            info!(cache = %name, "Deleting stale cache");
            let result = ctx.caches.delete(&name).await;
            (name, result)
        });

        let mut outcome = ActivateOutcome::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => outcome.deleted.push(name),
                Ok(false) => debug!(cache = %name, "Stale cache already gone"),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete stale cache");
                    outcome.failed_deletions.push((name, e));
                }
            }
        }

        outcome.claimed = ctx.clients.claim(ctx.worker_id).await?;

        let message = ClientMessage::SwUpdated {
            version: self.config.version.clone(),
        };
        let controlled = ctx
            .clients
            .match_all(ctx.worker_id, &ClientMatchOptions::default())
            .await?;
        for client in &controlled {
            match ctx.clients.post_message(&client.id, &message).await {
                Ok(()) => outcome.notified += 1,
                Err(e) => warn!(client = %client.id, error = %e, "Failed to notify client"),
            }
        }

        info!(
            version = %self.config.version,
            deleted = outcome.deleted.len(),
            claimed = outcome.claimed,
            notified = outcome.notified,
            "Service worker activated"
        );
        Ok(outcome)
    }

    async fn on_fetch(
        &self,
        ctx: &WorkerContext,
        event: FetchEvent,
    ) -> Result<FetchOutcome, ServiceWorkerError> {
        let request = event.request;
        let strategy = self.config.routes.classify(&request);
        debug!(url = %request.url, mode = ?request.mode, %strategy, "Routing request");

        let cache = self.config.generation.as_str();
        match strategy {
            Strategy::NetworkFirst => strategy::network_first(ctx, cache, request).await,
            Strategy::StaleWhileRevalidate => {
                strategy::stale_while_revalidate(ctx, cache, request).await
            }
            Strategy::NetworkOnly => strategy::network_only(ctx, request).await,
            Strategy::CacheFirst => strategy::cache_first(ctx, cache, request).await,
        }
    }

    async fn on_message(
        &self,
        ctx: &WorkerContext,
        event: MessageEvent,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        match ControlMessage::from_value(&event.data) {
            ControlMessage::SkipWaiting => {
                debug!("Skip waiting requested by page");
                ctx.registration.skip_waiting().await?;
                Ok(MessageOutcome::SkipWaiting)
            }
            ControlMessage::CheckUpdate => Ok(MessageOutcome::UpdateCheck(
                Self::spawn_update_check(ctx, "message"),
            )),
            ControlMessage::Unknown => {
                trace!(data = %event.data, "Ignoring unrecognised message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }

    async fn on_periodic_sync(
        &self,
        ctx: &WorkerContext,
        event: PeriodicSyncEvent,
    ) -> Result<SyncOutcome, ServiceWorkerError> {
        if event.tag != self.config.update_tag {
            trace!(tag = %event.tag, "Ignoring periodic sync");
            return Ok(SyncOutcome::Ignored);
        }
        info!(tag = %event.tag, "Running periodic update check");
        Ok(SyncOutcome::UpdateCheck(Self::spawn_update_check(
            ctx, "periodic-sync",
        )))
    }
}
