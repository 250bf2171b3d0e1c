//! # courier-server
//!
//! Accepts courier clients and talks to all of them at once.
//!
//! This crate provides:
//! - The accept loop, one listen task per accepted client
//! - The live client set with connection and removal hooks
//! - Fan-out requests to every connected client
//! - An optional authenticator gating inbound requests

pub mod listener;
pub mod registry;

pub use listener::Listener;
pub use registry::ClientRegistry;

use courier_core::{CourierError, Request, Result, ServerConfig};
use courier_messenger::{
    Authenticator, AuthenticatorSlot, ConnectionId, Dispatcher, ErrorHook, Messenger,
    MessengerBuilder, ReceptorRegistry, Side,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Called with a connection when it joins or leaves the client set
pub type ConnectionHook = Arc<dyn Fn(&Arc<Messenger>) + Send + Sync>;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Builder for [`Server`]
pub struct ServerBuilder {
    config: ServerConfig,
    receptors: Arc<ReceptorRegistry>,
    authenticator: Option<Arc<dyn Authenticator>>,
    on_connection: Option<ConnectionHook>,
    on_remove: Option<ConnectionHook>,
    on_error: Option<ErrorHook>,
}

impl ServerBuilder {
    /// Receptors shared by every accepted connection
    pub fn receptors(mut self, receptors: Arc<ReceptorRegistry>) -> Self {
        self.receptors = receptors;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn on_connection(mut self, hook: ConnectionHook) -> Self {
        self.on_connection = Some(hook);
        self
    }

    pub fn on_remove(mut self, hook: ConnectionHook) -> Self {
        self.on_remove = Some(hook);
        self
    }

    /// Error hook installed on every accepted connection
    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Bind the configured TCP address. Port 0 picks a free port.
    pub async fn bind(self) -> Result<Server> {
        let listener = Listener::bind_tcp(&self.config.addr()).await?;
        Ok(self.finish(listener))
    }

    /// Bind a Unix socket instead of TCP
    #[cfg(unix)]
    pub async fn bind_unix(self, path: impl AsRef<std::path::Path>) -> Result<Server> {
        let listener = Listener::bind_unix(path)?;
        Ok(self.finish(listener))
    }

    fn finish(self, listener: Listener) -> Server {
        let local_addr = listener.local_addr();
        let shared = Shared {
            config: self.config,
            receptors: self.receptors,
            authenticator: Arc::new(RwLock::new(self.authenticator)),
            clients: RwLock::new(ClientRegistry::new()),
            on_connection: self.on_connection,
            on_remove: self.on_remove,
            on_error: self.on_error,
            closed: AtomicBool::new(false),
        };
        Server {
            shared: Arc::new(shared),
            local_addr,
            listener: Mutex::new(Some(Arc::new(listener))),
            accept_handle: Mutex::new(None),
        }
    }
}

/// State shared between the server handle, the accept loop and the
/// per-client listen tasks
struct Shared {
    config: ServerConfig,
    receptors: Arc<ReceptorRegistry>,
    authenticator: AuthenticatorSlot,
    clients: RwLock<ClientRegistry>,
    on_connection: Option<ConnectionHook>,
    on_remove: Option<ConnectionHook>,
    on_error: Option<ErrorHook>,
    closed: AtomicBool,
}

impl Shared {
    async fn accept_loop(self: Arc<Self>, listener: Arc<Listener>) {
        loop {
            match listener.accept().await {
                Ok(builder) => self.admit(builder).await,
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    /// Attach a freshly accepted connection and start its listen task
    async fn admit(self: &Arc<Self>, builder: MessengerBuilder) {
        let dispatcher = Dispatcher::new(Arc::clone(&self.receptors))
            .with_authenticator_slot(Arc::clone(&self.authenticator));
        let mut builder = builder
            .side(Side::Server)
            .config(self.config.messenger())
            .dispatcher(dispatcher);
        if let Some(hook) = &self.on_error {
            builder = builder.on_error(Arc::clone(hook));
        }
        let messenger = builder.build();

        if self.closed.load(Ordering::SeqCst) {
            messenger.close().await;
            return;
        }

        self.clients.write().await.register(Arc::clone(&messenger));
        info!("Client {} connected from {}", messenger.id(), messenger.peer());
        if let Some(hook) = &self.on_connection {
            hook(&messenger);
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            Arc::clone(&messenger).run().await;
            shared.remove(&messenger).await;
        });
    }

    async fn remove(&self, messenger: &Arc<Messenger>) {
        let removed = self.clients.write().await.deregister(&messenger.id());
        if removed.is_some() {
            self.removed(messenger);
        }
    }

    fn removed(&self, messenger: &Arc<Messenger>) {
        info!("Client {} ({}) disconnected", messenger.id(), messenger.peer());
        if let Some(hook) = &self.on_remove {
            hook(messenger);
        }
    }
}

/// A listening courier server
pub struct Server {
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    listener: Mutex<Option<Arc<Listener>>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            receptors: Arc::new(ReceptorRegistry::new()),
            authenticator: None,
            on_connection: None,
            on_remove: None,
            on_error: None,
        }
    }

    /// Bind with the given receptors and no hooks
    pub async fn bind(config: ServerConfig, receptors: Arc<ReceptorRegistry>) -> Result<Self> {
        Self::builder(config).receptors(receptors).bind().await
    }

    /// Bound TCP address; `None` for Unix sockets
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn receptors(&self) -> &Arc<ReceptorRegistry> {
        &self.shared.receptors
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Spawn the accept loop. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CourierError::ConnectionClosed);
        }

        let mut handle = self
            .accept_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            debug!("Server already accepting");
            return Ok(());
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CourierError::ConnectionClosed)?;
        *handle = Some(tokio::spawn(
            Arc::clone(&self.shared).accept_loop(listener),
        ));
        Ok(())
    }

    /// Replace the authenticator; `None` lets every request through
    pub async fn set_authenticator(&self, authenticator: Option<Arc<dyn Authenticator>>) {
        *self.shared.authenticator.write().await = authenticator;
    }

    /// Snapshot of the connected clients
    pub async fn clients(&self) -> Vec<Arc<Messenger>> {
        self.shared.clients.read().await.list()
    }

    pub async fn client_count(&self) -> usize {
        self.shared.clients.read().await.count()
    }

    pub async fn client(&self, id: &ConnectionId) -> Option<Arc<Messenger>> {
        self.shared.clients.read().await.get(id).cloned()
    }

    /// Send `request` to every connected client and wait for all of them.
    ///
    /// Each client gets its own entry; one client failing or timing out
    /// leaves the others' results untouched.
    pub async fn send_request(&self, request: Request) -> HashMap<ConnectionId, Result<Option<Value>>> {
        self.send_request_as::<Value>(request).await
    }

    /// Like [`send_request`](Self::send_request), decoding each result into `T`
    pub async fn send_request_as<T>(&self, request: Request) -> HashMap<ConnectionId, Result<Option<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let clients = self.clients().await;
        debug!(
            "Fanning out {} ({}) to {} clients",
            request.id,
            request.method,
            clients.len()
        );

        let mut tasks = JoinSet::new();
        for client in clients {
            let request = request.clone();
            tasks.spawn(async move { (client.id(), client.request_as::<T>(request).await) });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => warn!("Fan-out task failed: {}", e),
            }
        }
        results
    }

    /// Send `request` to every connected client without waiting.
    ///
    /// `on_result` fires once per client as its answer arrives. Returns the
    /// number of clients the request went to.
    pub async fn send_request_each<F>(&self, request: Request, on_result: F) -> usize
    where
        F: Fn(ConnectionId, Result<Option<Value>>) + Send + Sync + 'static,
    {
        let on_result = Arc::new(on_result);
        let clients = self.clients().await;
        for client in &clients {
            let id = client.id();
            let on_success = {
                let on_result = Arc::clone(&on_result);
                move |object| on_result(id, Ok(object))
            };
            let on_failure = {
                let on_result = Arc::clone(&on_result);
                move |err| on_result(id, Err(err))
            };
            if let Err(err) = client
                .send_request(request.clone(), on_success, on_failure)
                .await
            {
                on_result(id, Err(err));
            }
        }
        clients.len()
    }

    /// Stop accepting and close every client. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self
            .accept_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.cleanup();
        }

        let clients = self.shared.clients.write().await.drain();
        info!("Server closing, disconnecting {} clients", clients.len());
        for client in clients {
            client.close().await;
            self.shared.removed(&client);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(handle) = self
            .accept_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
