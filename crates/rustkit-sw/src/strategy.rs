//! Retrieval strategies.
//!
//! Reads check the current generation's cache first and fall back to
//! [`CacheStorage::match_request`](crate::cache::CacheStorage::match_request) (all caches) on a miss; writes always
//! target the current generation's cache.

use crate::background::BackgroundTask;
use crate::handler::{FetchOutcome, WorkerContext};
use crate::router::Strategy;
use crate::{CacheError, ServiceWorkerError};
use rustkit_net::{Request, Response};
use tracing::{debug, warn};

/// Write a response into `cache`, creating the cache if needed.
async fn write_back(
    ctx: &WorkerContext,
    cache: &str,
    request: &Request,
    response: &Response,
) -> Result<(), CacheError> {
    ctx.caches.open(cache).await?;
    ctx.caches.put(cache, request, response).await
}

/// Look a request up, current generation first.
///
/// A store that survived activation only answers for entries the current
/// generation does not hold.
async fn lookup(
    ctx: &WorkerContext,
    cache: &str,
    request: &Request,
) -> Result<Option<Response>, CacheError> {
    if let Some(hit) = ctx.caches.match_in(cache, request).await? {
        return Ok(Some(hit));
    }
    ctx.caches.match_request(request).await
}

/// Write back, logging and dropping any failure.
async fn write_back_best_effort(
    ctx: &WorkerContext,
    cache: &str,
    request: &Request,
    response: &Response,
) {
    if let Err(e) = write_back(ctx, cache, request, response).await {
        warn!(cache = %cache, url = %request.url, error = %e, "Cache write-back failed");
    }
}

/// Network first; on network failure fall back to the cache.
///
/// Network responses, whatever their status, are written back before the
/// caller gets them.
pub async fn network_first(
    ctx: &WorkerContext,
    cache: &str,
    request: Request,
) -> Result<FetchOutcome, ServiceWorkerError> {
    match ctx.network.fetch(&request).await {
        Ok(response) => {
            write_back_best_effort(ctx, cache, &request, &response).await;
            Ok(FetchOutcome::from_network(Strategy::NetworkFirst, response))
        }
        Err(e) => {
            debug!(url = %request.url, error = %e, "Network unavailable, falling back to cache");
            match lookup(ctx, cache, &request).await? {
                Some(cached) => Ok(FetchOutcome::from_cache(Strategy::NetworkFirst, cached)),
                None => Err(ServiceWorkerError::NoResponse {
                    url: request.url.to_string(),
                }),
            }
        }
    }
}

/// Cached copy immediately, refreshed in the background.
///
/// On a miss the network answers and its response is written back.
pub async fn stale_while_revalidate(
    ctx: &WorkerContext,
    cache: &str,
    request: Request,
) -> Result<FetchOutcome, ServiceWorkerError> {
    if let Some(cached) = lookup(ctx, cache, &request).await? {
        let task = spawn_revalidation(ctx.clone(), cache.to_string(), request);
        return Ok(FetchOutcome::from_cache(Strategy::StaleWhileRevalidate, cached)
            .with_revalidation(task));
    }

    let response = ctx.network.fetch(&request).await?;
    write_back_best_effort(ctx, cache, &request, &response).await;
    Ok(FetchOutcome::from_network(
        Strategy::StaleWhileRevalidate,
        response,
    ))
}

fn spawn_revalidation(ctx: WorkerContext, cache: String, request: Request) -> BackgroundTask {
    BackgroundTask::spawn("revalidate", async move {
        let response = ctx.network.fetch(&request).await?;
        write_back(&ctx, &cache, &request, &response).await?;
        debug!(cache = %cache, url = %request.url, "Revalidated cached response");
        Ok::<(), ServiceWorkerError>(())
    })
}

/// Network only; the cache is not consulted.
pub async fn network_only(
    ctx: &WorkerContext,
    request: Request,
) -> Result<FetchOutcome, ServiceWorkerError> {
    let response = ctx.network.fetch(&request).await?;
    Ok(FetchOutcome::from_network(Strategy::NetworkOnly, response))
}

/// Cache first; on a miss the network answers without write-back.
pub async fn cache_first(
    ctx: &WorkerContext,
    cache: &str,
    request: Request,
) -> Result<FetchOutcome, ServiceWorkerError> {
    if let Some(cached) = lookup(ctx, cache, &request).await? {
        return Ok(FetchOutcome::from_cache(Strategy::CacheFirst, cached));
    }
    let response = ctx.network.fetch(&request).await?;
    Ok(FetchOutcome::from_network(Strategy::CacheFirst, response))
}
