//! Host side of the lifecycle.
//!
//! [`ServiceWorkerContainer`] plays the platform: it installs new worker
//! versions, promotes them through waiting to active, and dispatches fetch,
//! message and periodic sync events to the right version.

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::handler::{
    ActivateOutcome, FetchEvent, FetchOutcome, LifecycleHandler, MessageEvent, MessageOutcome,
    PeriodicSyncEvent, Registration, SyncOutcome, WorkerContext,
};
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState};
use async_trait::async_trait;
use rustkit_net::{Fetcher, Request, Response};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Events emitted by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker version changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        generation: String,
        new_state: ServiceWorkerState,
    },
    /// A worker asked for the script to be checked for updates.
    UpdateRequested { worker_id: ServiceWorkerId },
}

/// Summary of a worker version held by the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: ServiceWorkerId,
    pub generation: String,
    pub state: ServiceWorkerState,
}

/// Result of routing a request through the container.
#[derive(Debug)]
pub enum FetchResult {
    /// Handled by the active worker.
    Worker(FetchOutcome),
    /// No active worker; the request went straight to the network.
    Passthrough(Response),
}

impl FetchResult {
    pub fn response(&self) -> &Response {
        match self {
            FetchResult::Worker(outcome) => &outcome.response,
            FetchResult::Passthrough(response) => response,
        }
    }

    pub fn into_response(self) -> Response {
        match self {
            FetchResult::Worker(outcome) => outcome.response,
            FetchResult::Passthrough(response) => response,
        }
    }
}

/// Registration handle bound to one worker version.
struct SlotRegistration {
    worker_id: ServiceWorkerId,
    skip_waiting: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

#[async_trait]
impl Registration for SlotRegistration {
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self) -> Result<(), ServiceWorkerError> {
        self.event_tx
            .send(ServiceWorkerEvent::UpdateRequested {
                worker_id: self.worker_id,
            })
            .map_err(|_| ServiceWorkerError::State("registration host has shut down".into()))
    }
}

/// One worker version and its context.
#[derive(Clone)]
struct WorkerSlot {
    handler: Arc<dyn LifecycleHandler>,
    context: WorkerContext,
    state: ServiceWorkerState,
    skip_waiting: Arc<AtomicBool>,
}

impl WorkerSlot {
    fn id(&self) -> ServiceWorkerId {
        self.context.worker_id
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id(),
            generation: self.handler.generation().to_string(),
            state: self.state,
        }
    }
}

#[derive(Default)]
struct RegistrationSlots {
    installing: Option<WorkerSlot>,
    waiting: Option<WorkerSlot>,
    active: Option<WorkerSlot>,
}

/// Service worker container for one scope.
pub struct ServiceWorkerContainer {
    caches: Arc<dyn CacheStorage>,
    network: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    slots: RwLock<RegistrationSlots>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
        clients: Arc<dyn Clients>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                caches,
                network,
                clients,
                slots: RwLock::new(RegistrationSlots::default()),
                event_tx,
            },
            event_rx,
        )
    }

    fn new_slot(&self, handler: Arc<dyn LifecycleHandler>) -> WorkerSlot {
        let worker_id = ServiceWorkerId::new();
        let skip_waiting = Arc::new(AtomicBool::new(false));
        let registration = Arc::new(SlotRegistration {
            worker_id,
            skip_waiting: Arc::clone(&skip_waiting),
            event_tx: self.event_tx.clone(),
        });
        let context = WorkerContext::new(
            worker_id,
            Arc::clone(&self.caches),
            Arc::clone(&self.network),
            Arc::clone(&self.clients),
            registration,
        );
        WorkerSlot {
            handler,
            context,
            state: ServiceWorkerState::Parsed,
            skip_waiting,
        }
    }

    fn set_state(&self, slot: &mut WorkerSlot, state: ServiceWorkerState) {
        slot.state = state;
        debug!(worker = %slot.id(), generation = %slot.handler.generation(), ?state, "Worker state changed");
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            worker_id: slot.id(),
            generation: slot.handler.generation().to_string(),
            new_state: state,
        });
    }

    fn retire(&self, mut slot: WorkerSlot) {
        self.set_state(&mut slot, ServiceWorkerState::Redundant);
    }

    /// Install a new worker version.
    ///
    /// A failed install makes the version redundant and leaves the current
    /// active worker in place. A successful one waits, and is activated
    /// right away when it asked to skip waiting or nothing is active yet.
    pub async fn register(
        &self,
        handler: Arc<dyn LifecycleHandler>,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let mut slot = self.new_slot(handler);
        let id = slot.id();
        self.set_state(&mut slot, ServiceWorkerState::Installing);

        {
            let mut slots = self.slots.write().await;
            if let Some(superseded) = slots.installing.replace(slot.clone()) {
                self.retire(superseded);
            }
        }

        if let Err(e) = slot.handler.on_install(&slot.context).await {
            warn!(worker = %id, generation = %slot.handler.generation(), error = %e, "Install failed");
            let mut slots = self.slots.write().await;
            if slots.installing.as_ref().map(WorkerSlot::id) == Some(id) {
                slots.installing = None;
                self.retire(slot);
            }
            return Err(e);
        }

        let activate_now = {
            let mut slots = self.slots.write().await;
            if slots.installing.as_ref().map(WorkerSlot::id) != Some(id) {
                return Err(ServiceWorkerError::State(format!(
                    "install of {} was superseded",
                    id
                )));
            }
            slots.installing = None;
            self.set_state(&mut slot, ServiceWorkerState::Installed);
            let skip = slot.skip_waiting.load(Ordering::SeqCst);
            if let Some(previous) = slots.waiting.replace(slot) {
                self.retire(previous);
            }
            skip || slots.active.is_none()
        };

        if activate_now {
            self.activate_waiting().await?;
        } else {
            info!(worker = %id, "Worker installed, waiting for activation");
        }
        Ok(id)
    }

    /// Promote the waiting worker to active and run its activate handler.
    ///
    /// Returns `None` when nothing is waiting. The worker stays active even
    /// if its handler fails.
    pub async fn activate_waiting(&self) -> Result<Option<ActivateOutcome>, ServiceWorkerError> {
        let slot = {
            let mut slots = self.slots.write().await;
            let Some(mut slot) = slots.waiting.take() else {
                return Ok(None);
            };
            if let Some(previous) = slots.active.take() {
                self.retire(previous);
            }
            self.set_state(&mut slot, ServiceWorkerState::Activating);
            slots.active = Some(slot.clone());
            slot
        };

        let result = slot.handler.on_activate(&slot.context).await;

        {
            let mut slots = self.slots.write().await;
            if let Some(active) = slots.active.as_mut().filter(|s| s.id() == slot.id()) {
                self.set_state(active, ServiceWorkerState::Activated);
            }
        }

        match result {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                warn!(worker = %slot.id(), error = %e, "Activate handler failed");
                Err(e)
            }
        }
    }

    async fn activate_if_requested(&self) -> Result<(), ServiceWorkerError> {
        let requested = self
            .slots
            .read()
            .await
            .waiting
            .as_ref()
            .is_some_and(|s| s.skip_waiting.load(Ordering::SeqCst));
        if requested {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    /// Route a request through the active worker, or straight to the network.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchResult, ServiceWorkerError> {
        let active = self.active_slot().await;
        match active {
            Some(slot) if slot.state.can_intercept_fetch() => {
                let outcome = slot
                    .handler
                    .on_fetch(&slot.context, FetchEvent::new(request))
                    .await?;
                Ok(FetchResult::Worker(outcome))
            }
            _ => {
                debug!(url = %request.url, "No active worker, passing request through");
                let response = self.network.fetch(&request).await?;
                Ok(FetchResult::Passthrough(response))
            }
        }
    }

    /// Post a page message to the active worker.
    pub async fn post_message(&self, data: JsonValue) -> Result<MessageOutcome, ServiceWorkerError> {
        let slot = self
            .active_slot()
            .await
            .ok_or_else(|| ServiceWorkerError::State("no active worker".into()))?;
        self.deliver_message(slot, data).await
    }

    /// Post a page message to the waiting worker.
    pub async fn post_message_to_waiting(
        &self,
        data: JsonValue,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        let slot = self
            .slots
            .read()
            .await
            .waiting
            .clone()
            .ok_or_else(|| ServiceWorkerError::State("no waiting worker".into()))?;
        self.deliver_message(slot, data).await
    }

    async fn deliver_message(
        &self,
        slot: WorkerSlot,
        data: JsonValue,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        let outcome = slot
            .handler
            .on_message(&slot.context, MessageEvent::new(data))
            .await?;
        self.activate_if_requested().await?;
        Ok(outcome)
    }

    /// Fire a periodic trigger at the active worker.
    pub async fn periodic_sync(&self, tag: &str) -> Result<SyncOutcome, ServiceWorkerError> {
        match self.active_slot().await {
            Some(slot) => {
                slot.handler
                    .on_periodic_sync(&slot.context, PeriodicSyncEvent::new(tag))
                    .await
            }
            None => {
                debug!(tag, "No active worker for periodic sync");
                Ok(SyncOutcome::Ignored)
            }
        }
    }

    async fn active_slot(&self) -> Option<WorkerSlot> {
        self.slots.read().await.active.clone()
    }

    /// The active worker, if any.
    pub async fn active(&self) -> Option<WorkerInfo> {
        self.slots.read().await.active.as_ref().map(WorkerSlot::info)
    }

    /// The waiting worker, if any.
    pub async fn waiting(&self) -> Option<WorkerInfo> {
        self.slots.read().await.waiting.as_ref().map(WorkerSlot::info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::clients::ClientRegistry;
    use crate::config::WorkerConfig;
    use crate::handler::InstallOutcome;
    use crate::worker::AppShellWorker;
    use http::{HeaderMap, StatusCode};
    use rustkit_net::NetError;
    use serde_json::json;
    use url::Url;

    /// Echoes the request URL; URLs containing "broken" fail.
    struct EchoNetwork;

    #[async_trait]
    impl Fetcher for EchoNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
            if request.url.as_str().contains("broken") {
                return Err(NetError::RequestFailed("connection reset".into()));
            }
            Ok(Response::new(
                request.url.clone(),
                StatusCode::OK,
                HeaderMap::new(),
                request.url.to_string().into(),
            ))
        }
    }

    /// Installs without touching anything and never skips waiting.
    struct PatientHandler(&'static str);

    #[async_trait]
    impl LifecycleHandler for PatientHandler {
        fn generation(&self) -> &str {
            self.0
        }

        async fn on_install(
            &self,
            _ctx: &WorkerContext,
        ) -> Result<InstallOutcome, ServiceWorkerError> {
            Ok(InstallOutcome {
                cache: self.0.to_string(),
                cached: 0,
            })
        }

        async fn on_activate(
            &self,
            _ctx: &WorkerContext,
        ) -> Result<ActivateOutcome, ServiceWorkerError> {
            Ok(ActivateOutcome::default())
        }

        async fn on_fetch(
            &self,
            ctx: &WorkerContext,
            event: FetchEvent,
        ) -> Result<FetchOutcome, ServiceWorkerError> {
            crate::strategy::network_only(ctx, event.request).await
        }

        async fn on_message(
            &self,
            ctx: &WorkerContext,
            event: MessageEvent,
        ) -> Result<MessageOutcome, ServiceWorkerError> {
            if event.data == json!({ "type": "SKIP_WAITING" }) {
                ctx.registration.skip_waiting().await?;
                return Ok(MessageOutcome::SkipWaiting);
            }
            Ok(MessageOutcome::Ignored)
        }

        async fn on_periodic_sync(
            &self,
            _ctx: &WorkerContext,
            _event: PeriodicSyncEvent,
        ) -> Result<SyncOutcome, ServiceWorkerError> {
            Ok(SyncOutcome::Ignored)
        }
    }

    fn scope() -> Url {
        Url::parse("https://app.test/").unwrap()
    }

    fn container() -> (
        ServiceWorkerContainer,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
    ) {
        ServiceWorkerContainer::new(
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(EchoNetwork),
            Arc::new(ClientRegistry::new(scope())),
        )
    }

    fn app_shell(generation: &str, manifest: &[&str]) -> Arc<dyn LifecycleHandler> {
        let config = WorkerConfig::new(generation, "1.0.0", scope())
            .with_manifest(manifest.iter().copied());
        Arc::new(AppShellWorker::new(config).unwrap())
    }

    fn states(events: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerState> {
        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        states
    }

    #[tokio::test]
    async fn test_first_worker_activates() {
        let (container, mut events) = container();

        let id = container
            .register(app_shell("v1", &["./index.html"]))
            .await
            .unwrap();

        let active = container.active().await.unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.generation, "v1");
        assert_eq!(active.state, ServiceWorkerState::Activated);
        assert!(container.waiting().await.is_none());
        assert_eq!(
            states(&mut events),
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_install_becomes_redundant() {
        let (container, mut events) = container();
        container
            .register(app_shell("v1", &["./index.html"]))
            .await
            .unwrap();
        states(&mut events);

        let err = container
            .register(app_shell("v2", &["./index.html", "./broken.js"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::Install { .. }));

        assert_eq!(container.active().await.unwrap().generation, "v1");
        assert_eq!(
            states(&mut events),
            vec![ServiceWorkerState::Installing, ServiceWorkerState::Redundant]
        );
    }

    #[tokio::test]
    async fn test_worker_waits_until_skip_waiting() {
        let (container, _events) = container();
        container.register(Arc::new(PatientHandler("v1"))).await.unwrap();
        container.register(Arc::new(PatientHandler("v2"))).await.unwrap();

        assert_eq!(container.active().await.unwrap().generation, "v1");
        let waiting = container.waiting().await.unwrap();
        assert_eq!(waiting.generation, "v2");
        assert_eq!(waiting.state, ServiceWorkerState::Installed);

        let outcome = container
            .post_message_to_waiting(json!({ "type": "SKIP_WAITING" }))
            .await
            .unwrap();
        assert!(matches!(outcome, MessageOutcome::SkipWaiting));

        assert!(container.waiting().await.is_none());
        assert_eq!(container.active().await.unwrap().generation, "v2");
    }

    #[tokio::test]
    async fn test_newer_waiting_worker_replaces_older() {
        let (container, _events) = container();
        container.register(Arc::new(PatientHandler("v1"))).await.unwrap();
        container.register(Arc::new(PatientHandler("v2"))).await.unwrap();
        container.register(Arc::new(PatientHandler("v3"))).await.unwrap();

        assert_eq!(container.waiting().await.unwrap().generation, "v3");
        assert_eq!(container.activate_waiting().await.unwrap().map(|o| o.claimed), Some(0));
        assert_eq!(container.active().await.unwrap().generation, "v3");
        assert!(container.activate_waiting().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_passes_through_without_active_worker() {
        let (container, _events) = container();
        let request = Request::try_get("https://app.test/index.html").unwrap();

        let result = container.handle_fetch(request).await.unwrap();
        assert!(matches!(result, FetchResult::Passthrough(_)));
        assert_eq!(result.response().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_fetch_routed_to_active_worker() {
        let (container, _events) = container();
        container
            .register(app_shell("v1", &["./index.html"]))
            .await
            .unwrap();

        let request = Request::try_get("https://cdn.test/font.woff2").unwrap();
        match container.handle_fetch(request).await.unwrap() {
            FetchResult::Worker(outcome) => {
                assert_eq!(outcome.strategy, crate::router::Strategy::CacheFirst)
            }
            FetchResult::Passthrough(_) => panic!("expected worker response"),
        }
    }

    #[tokio::test]
    async fn test_update_request_is_reported() {
        let (container, mut events) = container();
        let id = container
            .register(app_shell("v1", &["./index.html"]))
            .await
            .unwrap();
        states(&mut events);

        let outcome = container
            .post_message(json!({ "type": "CHECK_UPDATE" }))
            .await
            .unwrap();
        let MessageOutcome::UpdateCheck(task) = outcome else {
            panic!("expected update check");
        };
        task.join().await;

        assert_eq!(
            events.try_recv().unwrap(),
            ServiceWorkerEvent::UpdateRequested { worker_id: id }
        );
    }

    #[tokio::test]
    async fn test_messages_need_an_active_worker() {
        let (container, _events) = container();
        assert!(matches!(
            container.post_message(json!({ "type": "PING" })).await,
            Err(ServiceWorkerError::State(_))
        ));
        assert!(matches!(
            container.periodic_sync("check-updates").await,
            Ok(SyncOutcome::Ignored)
        ));
    }
}
