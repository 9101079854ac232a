//! Test doubles for the worker's platform seams.

#![allow(dead_code)]

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use rustkit_net::{Fetcher, NetError, Request, Response};
use rustkit_sw::{
    CacheError, CacheStorage, ClientRegistry, MemoryCacheStorage, Registration, ServiceWorkerError,
    ServiceWorkerId, WorkerContext,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use url::Url;

pub const SCOPE: &str = "https://app.test/";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn scope() -> Url {
    url(SCOPE)
}

#[derive(Clone)]
enum Route {
    Respond { status: StatusCode, body: String },
    Fail,
}

/// Network whose answers are scripted per URL.
///
/// Unscripted URLs fail like an unreachable host. A gated URL holds its
/// fetch until [`ScriptedNetwork::release`] is called; the route is read
/// after the gate opens.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap();
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Respond {
                status,
                body: body.to_string(),
            },
        );
    }

    pub fn fail(&self, url: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Fail);
    }

    pub fn gate(&self, url: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, url: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(url) {
            gate.notify_one();
        }
    }

    /// URLs fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push(key.clone());

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let route = self.routes.lock().unwrap().get(&key).cloned();
        match route {
            Some(Route::Respond { status, body }) => Ok(Response::new(
                request.url.clone(),
                status,
                HeaderMap::new(),
                body.into(),
            )),
            Some(Route::Fail) | None => {
                Err(NetError::RequestFailed(format!("{} is unreachable", key)))
            }
        }
    }
}

/// Memory storage that records writes and can be told to fail.
#[derive(Default)]
pub struct InstrumentedStorage {
    inner: MemoryCacheStorage,
    failing_deletes: Mutex<HashSet<String>>,
    fail_puts: AtomicBool,
    puts: AtomicUsize,
    deletes: Mutex<Vec<String>>,
}

impl InstrumentedStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_delete(&self, name: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    /// Body stored for `url` in cache `name`.
    pub async fn body(&self, name: &str, url: &str) -> Option<String> {
        let request = Request::try_get(url).unwrap();
        self.inner
            .entry(name, &request)
            .await
            .map(|entry| entry.response.text().unwrap())
    }

    /// Seed an entry directly, bypassing the write counters.
    pub async fn seed(&self, name: &str, url: &str, body: &str) {
        let request = Request::try_get(url).unwrap();
        let response = Response::new(
            request.url.clone(),
            StatusCode::OK,
            HeaderMap::new(),
            body.to_string().into(),
        );
        self.inner.open(name).await.unwrap();
        self.inner.put(name, &request, &response).await.unwrap();
    }
}

#[async_trait]
impl CacheStorage for InstrumentedStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        self.inner.has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        if self.failing_deletes.lock().unwrap().contains(name) {
            return Err(CacheError::Storage(format!("{} is locked", name)));
        }
        let existed = self.inner.delete(name).await?;
        self.deletes.lock().unwrap().push(name.to_string());
        Ok(existed)
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(CacheError::Storage("quota exceeded".into()));
        }
        self.inner.put(name, request, response).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn match_in(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, CacheError> {
        self.inner.match_in(name, request).await
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        self.inner.match_request(request).await
    }

    async fn cached_urls(&self, name: &str) -> Result<Vec<Url>, CacheError> {
        self.inner.cached_urls(name).await
    }
}

/// Registration that only counts calls.
#[derive(Default)]
pub struct RecordingRegistration {
    pub skip_waiting: AtomicUsize,
    pub updates: AtomicUsize,
}

#[async_trait]
impl Registration for RecordingRegistration {
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self) -> Result<(), ServiceWorkerError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A worker context wired to test doubles.
pub struct Harness {
    pub network: Arc<ScriptedNetwork>,
    pub storage: Arc<InstrumentedStorage>,
    pub clients: Arc<ClientRegistry>,
    pub registration: Arc<RecordingRegistration>,
    pub ctx: WorkerContext,
}

impl Harness {
    pub fn new() -> Self {
        init_logging();
        let network = ScriptedNetwork::new();
        let storage = InstrumentedStorage::new();
        let clients = Arc::new(ClientRegistry::new(scope()));
        let registration = Arc::new(RecordingRegistration::default());
        let ctx = WorkerContext::new(
            ServiceWorkerId::new(),
            storage.clone(),
            network.clone(),
            clients.clone(),
            registration.clone(),
        );
        Self {
            network,
            storage,
            clients,
            registration,
            ctx,
        }
    }

    /// A fresh context for another worker version sharing the same platform.
    pub fn next_version(&self) -> WorkerContext {
        WorkerContext {
            worker_id: ServiceWorkerId::new(),
            ..self.ctx.clone()
        }
    }
}
