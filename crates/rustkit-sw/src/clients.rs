//! Clients API: the pages a worker controls.

use crate::messages::ClientMessage;
use crate::{ServiceWorkerError, ServiceWorkerId};
use async_trait::async_trait;
use hashbrown::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use url::Url;

/// Identifier of an open page or worker client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: ClientId,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,
}

/// Options for `match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by the calling worker.
    pub include_uncontrolled: bool,
    /// Client type filter.
    pub client_type: ClientType,
}

/// Access to the pages a worker can see.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Make `worker` the controller of every client in scope. Returns how many were claimed.
    async fn claim(&self, worker: ServiceWorkerId) -> Result<usize, ServiceWorkerError>;

    /// Clients matching the options, from the point of view of `worker`.
    async fn match_all(
        &self,
        worker: ServiceWorkerId,
        options: &ClientMatchOptions,
    ) -> Result<Vec<Client>, ServiceWorkerError>;

    /// Post a message to one client.
    async fn post_message(
        &self,
        client: &ClientId,
        message: &ClientMessage,
    ) -> Result<(), ServiceWorkerError>;
}

struct ClientSlot {
    client: Client,
    controller: Option<ServiceWorkerId>,
    tx: mpsc::UnboundedSender<ClientMessage>,
}

/// In-memory [`Clients`] implementation.
///
/// Pages connect with [`ClientRegistry::open_window`] and receive worker
/// messages on the returned channel.
pub struct ClientRegistry {
    scope: Url,
    clients: RwLock<HashMap<ClientId, ClientSlot>>,
}

impl ClientRegistry {
    /// Create a registry for a worker scope.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Connect a window client.
    pub async fn open_window(&self, url: Url) -> (Client, mpsc::UnboundedReceiver<ClientMessage>) {
        self.connect(url, ClientType::Window).await
    }

    /// Connect a client of any type.
    pub async fn connect(
        &self,
        url: Url,
        client_type: ClientType,
    ) -> (Client, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client {
            id: ClientId::new(),
            url,
            client_type,
        };
        debug!(client = %client.id, url = %client.url, "Client connected");
        self.clients.write().await.insert(
            client.id.clone(),
            ClientSlot {
                client: client.clone(),
                controller: None,
                tx,
            },
        );
        (client, rx)
    }

    /// Remove a client (page closed).
    pub async fn disconnect(&self, id: &ClientId) -> bool {
        self.clients.write().await.remove(id).is_some()
    }

    /// The worker currently controlling a client.
    pub async fn controller(&self, id: &ClientId) -> Option<ServiceWorkerId> {
        self.clients.read().await.get(id).and_then(|slot| slot.controller)
    }

    fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }
}

#[async_trait]
impl Clients for ClientRegistry {
    async fn claim(&self, worker: ServiceWorkerId) -> Result<usize, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for slot in clients.values_mut() {
            if self.in_scope(&slot.client.url) {
                slot.controller = Some(worker);
                claimed += 1;
            }
        }
        debug!(worker = %worker, claimed, "Clients claimed");
        Ok(claimed)
    }

    async fn match_all(
        &self,
        worker: ServiceWorkerId,
        options: &ClientMatchOptions,
    ) -> Result<Vec<Client>, ServiceWorkerError> {
        let clients = self.clients.read().await;
        Ok(clients
            .values()
            .filter(|slot| options.include_uncontrolled || slot.controller == Some(worker))
            .filter(|slot| match options.client_type {
                ClientType::All => true,
                t => slot.client.client_type == t,
            })
            .map(|slot| slot.client.clone())
            .collect())
    }

    async fn post_message(
        &self,
        client: &ClientId,
        message: &ClientMessage,
    ) -> Result<(), ServiceWorkerError> {
        let clients = self.clients.read().await;
        let slot = clients
            .get(client)
            .ok_or_else(|| ServiceWorkerError::Client(format!("unknown client {}", client)))?;
        slot.tx
            .send(message.clone())
            .map_err(|_| ServiceWorkerError::Client(format!("client {} is gone", client)))?;
        trace!(client = %client, ?message, "Message posted");
        Ok(())
    }
}
