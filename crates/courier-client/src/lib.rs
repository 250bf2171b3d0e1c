//! Courier client
//!
//! A client is one connection dialed out to a courier server. It runs its
//! listen loop on a background task until closed or the socket fails, and
//! can answer requests the server sends it with its own receptors.

use courier_core::{ClientConfig, CourierError, Request, Result};
use courier_messenger::{ErrorHook, Messenger, ReceptorRegistry, Side, tcp};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    receptors: Arc<ReceptorRegistry>,
    on_error: Option<ErrorHook>,
}

impl ClientBuilder {
    /// Receptors answering requests sent by the server
    pub fn receptors(mut self, receptors: Arc<ReceptorRegistry>) -> Self {
        self.receptors = receptors;
        self
    }

    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Dial the configured TCP address
    pub async fn connect(self) -> Result<Client> {
        let addr = self.config.addr();
        info!("Connecting to courier server at {}", addr);

        let stream = tcp::connect(&addr, self.config.connect_timeout).await?;
        let (reader, writer) = tcp::into_framed(stream)?;
        let builder = Messenger::builder(reader, writer).peer(addr);
        Ok(self.start(builder))
    }

    /// Dial a Unix socket instead of TCP
    #[cfg(unix)]
    pub async fn connect_unix(self, path: impl AsRef<std::path::Path>) -> Result<Client> {
        let path = path.as_ref();
        info!("Connecting to courier server at {}", path.display());

        let stream = courier_messenger::unix::connect(path).await?;
        let (reader, writer) = courier_messenger::unix::into_framed(stream);
        let builder = Messenger::builder(reader, writer).peer(path.display().to_string());
        Ok(self.start(builder))
    }

    fn start(self, builder: courier_messenger::MessengerBuilder) -> Client {
        let mut builder = builder
            .side(Side::Client)
            .config(self.config.messenger())
            .receptors(self.receptors);
        if let Some(hook) = self.on_error {
            builder = builder.on_error(hook);
        }

        let messenger = builder.build();
        let reader_handle = tokio::spawn(messenger.clone().run());
        Client {
            messenger,
            reader_handle,
        }
    }
}

/// One outbound courier connection
pub struct Client {
    messenger: Arc<Messenger>,
    reader_handle: JoinHandle<()>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            receptors: Arc::new(ReceptorRegistry::new()),
            on_error: None,
        }
    }

    /// Dial with no receptors of our own
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    /// The underlying connection
    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    pub fn is_closed(&self) -> bool {
        self.messenger.is_closed()
    }

    /// Send a request; exactly one of the callbacks fires later
    pub async fn send_request<S, F>(&self, request: Request, on_success: S, on_failure: F) -> Result<()>
    where
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(CourierError) + Send + 'static,
    {
        self.messenger
            .send_request(request, on_success, on_failure)
            .await
    }

    /// Send a request and wait for its result, up to the timeout
    pub async fn request(&self, request: Request) -> Result<Option<Value>> {
        self.messenger.request(request).await
    }

    /// Send a request and decode its result into `T`
    pub async fn request_as<T: DeserializeOwned>(&self, request: Request) -> Result<Option<T>> {
        self.messenger.request_as(request).await
    }

    /// Close the connection and stop the listen loop
    pub async fn close(&self) {
        self.messenger.close().await;
    }

    /// Whether the listen loop has exited
    pub fn is_listening(&self) -> bool {
        !self.reader_handle.is_finished()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Stop the listen loop if the owner never closed us
        self.reader_handle.abort();
    }
}
