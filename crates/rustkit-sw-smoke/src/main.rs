//! RustKit Service Worker Smoke Harness
//!
//! Registers the app-shell worker against the live network, routes a handful
//! of requests through it and prints a JSON summary of what happened.
//!
//! ```text
//! rustkit-sw-smoke [--config worker.json] [--json-logs]
//!                  [--navigate URL]... [--message JSON]... [--sync TAG]... [URL]...
//! ```

use rustkit_common::{init_logging, LogConfig, LogFormat, OptionExt, Result, ResultExt};
use rustkit_net::{LoaderConfig, Request, ResourceLoader};
use rustkit_sw::{
    AppShellWorker, BackgroundTask, CacheStorage, ClientRegistry, FetchResult, MemoryCacheStorage,
    MessageOutcome, ResponseSource, ServiceWorkerContainer, ServiceWorkerEvent, SyncOutcome,
    WorkerConfig,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    json_logs: bool,
    navigations: Vec<String>,
    messages: Vec<String>,
    sync_tags: Vec<String>,
    urls: Vec<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut json_logs = false;
        let mut navigations = Vec::new();
        let mut messages = Vec::new();
        let mut sync_tags = Vec::new();
        let mut urls = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    config = args.next().map(PathBuf::from);
                }
                "--json-logs" => {
                    json_logs = true;
                }
                "--navigate" => {
                    navigations.extend(args.next());
                }
                "--message" => {
                    messages.extend(args.next());
                }
                "--sync" => {
                    sync_tags.extend(args.next());
                }
                other if other.starts_with("--") => {
                    eprintln!("Warning: ignoring unknown option {}", other);
                }
                _ => urls.push(arg),
            }
        }

        Self {
            config,
            json_logs,
            navigations,
            messages,
            sync_tags,
            urls,
        }
    }
}

fn source_name(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
    }
}

fn describe_event(event: &ServiceWorkerEvent) -> Value {
    match event {
        ServiceWorkerEvent::StateChange {
            worker_id,
            generation,
            new_state,
        } => json!({
            "worker": worker_id.to_string(),
            "generation": generation,
            "state": new_state,
        }),
        ServiceWorkerEvent::UpdateRequested { worker_id } => json!({
            "worker": worker_id.to_string(),
            "update_requested": true,
        }),
    }
}

async fn run(args: Args) -> Result<Value> {
    let config = match &args.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };
    let generation = config.generation.clone();
    let scope = config.scope.clone();

    let loader = ResourceLoader::new(LoaderConfig::default())
        .context("failed to create resource loader")?;
    let storage = Arc::new(MemoryCacheStorage::new());
    let clients = Arc::new(ClientRegistry::new(scope.clone()));
    let (container, mut events) =
        ServiceWorkerContainer::new(storage.clone(), Arc::new(loader), clients.clone());

    let (page, mut inbox) = clients.open_window(scope.clone()).await;
    info!(client = %page.id, url = %page.url, "Opened window client");

    let started = Instant::now();
    let worker_id = container
        .register(Arc::new(AppShellWorker::new(config)?))
        .await?;
    let active = container
        .active()
        .await
        .ok_or_not_found("active service worker")?;
    info!(
        worker = %worker_id,
        generation = %active.generation,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Service worker ready"
    );

    let mut requests = Vec::new();
    for url in &args.navigations {
        let request = Request::try_get(url).context("invalid navigation URL")?;
        requests.push(Request::navigate(request.url));
    }
    for url in &args.urls {
        requests.push(Request::try_get(url).context("invalid request URL")?);
    }

    let mut background: Vec<BackgroundTask> = Vec::new();
    let mut fetches = Vec::new();
    for request in requests {
        let url = request.url.to_string();
        let started = Instant::now();
        let entry = match container.handle_fetch(request).await {
            Ok(FetchResult::Worker(mut outcome)) => {
                background.extend(outcome.revalidation.take());
                json!({
                    "url": url,
                    "strategy": outcome.strategy.to_string(),
                    "source": source_name(outcome.source),
                    "status": outcome.response.status.as_u16(),
                    "bytes": outcome.response.content_length(),
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                })
            }
            Ok(FetchResult::Passthrough(response)) => json!({
                "url": url,
                "source": "passthrough",
                "status": response.status.as_u16(),
                "bytes": response.content_length(),
            }),
            Err(e) => {
                let e = rustkit_common::RustKitError::from(e);
                error!(url = %url, error = %e, "Fetch failed");
                json!({ "url": url, "error": e.to_string(), "category": e.category() })
            }
        };
        fetches.push(entry);
    }

    let mut messages = Vec::new();
    for raw in &args.messages {
        let data: Value = serde_json::from_str(raw).context("invalid --message payload")?;
        let outcome = match container.post_message(data.clone()).await? {
            MessageOutcome::SkipWaiting => "skip-waiting",
            MessageOutcome::UpdateCheck(task) => {
                background.push(task);
                "update-check"
            }
            MessageOutcome::Ignored => "ignored",
        };
        messages.push(json!({ "data": data, "outcome": outcome }));
    }

    let mut syncs = Vec::new();
    for tag in &args.sync_tags {
        let outcome = match container.periodic_sync(tag).await? {
            SyncOutcome::UpdateCheck(task) => {
                background.push(task);
                "update-check"
            }
            SyncOutcome::Ignored => "ignored",
        };
        syncs.push(json!({ "tag": tag, "outcome": outcome }));
    }

    for task in background {
        task.join().await;
    }

    let cached: Vec<String> = storage
        .cached_urls(&generation)
        .await
        .context("failed to list cached resources")?
        .into_iter()
        .map(String::from)
        .collect();

    let mut lifecycle = Vec::new();
    while let Ok(event) = events.try_recv() {
        lifecycle.push(describe_event(&event));
    }

    let mut notifications = Vec::new();
    while let Ok(message) = inbox.try_recv() {
        notifications.push(serde_json::to_value(&message).context("failed to encode message")?);
    }

    Ok(json!({
        "worker": worker_id.to_string(),
        "generation": generation,
        "cached": cached,
        "fetches": fetches,
        "messages": messages,
        "periodic_sync": syncs,
        "lifecycle": lifecycle,
        "notifications": notifications,
    }))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = if args.json_logs {
        LogConfig::default().with_format(LogFormat::Json)
    } else {
        LogConfig::default()
    };
    if let Err(e) = init_logging(log_config) {
        eprintln!("Warning: {}", e);
    }

    match run(args).await {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            error!(category = e.category(), error = %e, "Smoke run failed");
            let result = json!({ "error": e.to_string(), "category": e.category() });
            println!("{}", result);
            std::process::exit(1);
        }
    }
}
