//! One endpoint of a courier conversation
//!
//! A [`Messenger`] owns one framed byte stream, the table of requests it
//! is waiting on, and the dispatcher that answers inbound requests.
//! `listen()` drains one frame (or one timeout) per call; `run()` calls it
//! until the connection closes.

use crate::awaiting::{AwaitingRegistry, AwaitingRequest, Completion};
use crate::dispatcher::Dispatcher;
use crate::receptor::ReceptorRegistry;
use crate::transport::{AsyncReader, AsyncWriter, Frame};
use courier_core::codec::{self, invalid_message_notice};
use courier_core::{CourierError, Message, MessengerConfig, Request, Response, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Unique identifier of a connection
pub type ConnectionId = Uuid;

/// Receives protocol and handler failures that have no caller to go to
pub type ErrorHook = Arc<dyn Fn(&CourierError) + Send + Sync>;

/// Which end of the conversation this messenger is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Dialed out; never sends `Invalid Message:` notices
    Client,
    /// Accepted by a server; answers undecodable frames with a notice
    Server,
}

/// What one call to [`Messenger::listen`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenOutcome {
    /// A frame was read and handled
    Received,
    /// Nothing arrived within the timeout and nothing is outstanding
    Idle,
    /// The timeout sweep failed this many requests
    TimedOut(usize),
    /// The connection is closed; stop listening
    Closed,
}

fn log_error(err: &CourierError) {
    error!("{}", err);
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// A framed, bidirectional courier connection
pub struct Messenger {
    id: ConnectionId,
    peer: String,
    side: Side,
    timeout: Duration,
    reader: Mutex<Box<dyn AsyncReader>>,
    writer: Mutex<Box<dyn AsyncWriter>>,
    awaiting: AwaitingRegistry,
    dispatcher: Dispatcher,
    on_error: ErrorHook,
    closed: AtomicBool,
    wake: Notify,
}

/// Builder for [`Messenger`]
pub struct MessengerBuilder {
    reader: Box<dyn AsyncReader>,
    writer: Box<dyn AsyncWriter>,
    side: Side,
    peer: String,
    config: MessengerConfig,
    dispatcher: Option<Dispatcher>,
    on_error: ErrorHook,
}

impl MessengerBuilder {
    pub fn side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Label for logs, usually the peer address
    pub fn peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn config(mut self, config: MessengerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn receptors(self, receptors: Arc<ReceptorRegistry>) -> Self {
        self.dispatcher(Dispatcher::new(receptors))
    }

    pub fn on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = hook;
        self
    }

    pub fn build(self) -> Arc<Messenger> {
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Dispatcher::new(Arc::new(ReceptorRegistry::new())));
        Arc::new(Messenger {
            id: Uuid::new_v4(),
            peer: self.peer,
            side: self.side,
            timeout: self.config.timeout,
            reader: Mutex::new(self.reader),
            writer: Mutex::new(self.writer),
            awaiting: AwaitingRegistry::new(),
            dispatcher,
            on_error: self.on_error,
            closed: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }
}

impl Messenger {
    /// Start building a messenger over framed halves
    pub fn builder<R, W>(reader: R, writer: W) -> MessengerBuilder
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        MessengerBuilder {
            reader: Box::new(reader),
            writer: Box::new(writer),
            side: Side::Client,
            peer: "unknown".into(),
            config: MessengerConfig::default(),
            dispatcher: None,
            on_error: Arc::new(log_error),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.awaiting.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Hand a failure to the error hook
    pub fn report(&self, err: &CourierError) {
        (self.on_error)(err);
    }

    /// Send a request; exactly one callback fires later.
    ///
    /// `on_success` gets `None` for void results and no-ops. An `Err`
    /// return means nothing was sent and neither callback will fire.
    pub async fn send_request<S, F>(&self, request: Request, on_success: S, on_failure: F) -> Result<()>
    where
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(CourierError) + Send + 'static,
    {
        let complete: Completion = Box::new(move |outcome| match outcome {
            Ok(object) => on_success(object),
            Err(err) => on_failure(err),
        });
        self.submit(request, complete).await
    }

    /// Like [`send_request`](Self::send_request), decoding the result into `T`
    pub async fn send_request_with<T, S, F>(
        &self,
        request: Request,
        on_success: S,
        on_failure: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        S: FnOnce(Option<T>) + Send + 'static,
        F: FnOnce(CourierError) + Send + 'static,
    {
        let complete: Completion = Box::new(move |outcome| match outcome.and_then(decode_result::<T>) {
            Ok(object) => on_success(object),
            Err(err) => on_failure(err),
        });
        self.submit(request, complete).await
    }

    /// Send a request and wait for its result, up to the connection timeout
    pub async fn request(&self, request: Request) -> Result<Option<Value>> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        let complete: Completion = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });

        let started = Instant::now();
        self.submit(request, complete).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CourierError::ConnectionClosed),
            Err(_) => {
                // The listen loop may not have swept it yet
                self.awaiting.take(&id);
                Err(CourierError::Timeout {
                    id,
                    elapsed: started.elapsed(),
                })
            }
        }
    }

    /// Like [`request`](Self::request), decoding the result into `T`
    pub async fn request_as<T: DeserializeOwned>(&self, request: Request) -> Result<Option<T>> {
        self.request(request).await.and_then(decode_result::<T>)
    }

    async fn submit(&self, request: Request, complete: Completion) -> Result<()> {
        if self.is_closed() {
            return Err(CourierError::ConnectionClosed);
        }

        let id = request.id;
        if !self
            .awaiting
            .insert(AwaitingRequest::new(id, request.method.clone(), complete))
        {
            return Err(CourierError::IpcError(format!(
                "Request {} already in flight",
                id
            )));
        }

        if let Err(err) = self.write(&Message::Request(request)).await {
            // Never sent; drop it without firing callbacks
            self.awaiting.take(&id);
            return Err(err);
        }

        // Let an idle listen loop pick up the new deadline
        self.wake.notify_waiters();
        Ok(())
    }

    async fn write(&self, msg: &Message) -> Result<()> {
        let frame = codec::encode_frame(msg)?;
        debug!("[{}→{}] {}", self.id, self.peer, preview(&frame));

        let mut writer = self.writer.lock().await;
        writer.write_message(frame.as_bytes()).await
    }

    async fn write_notice(&self, err: &CourierError) {
        let mut notice = invalid_message_notice(err);
        notice.push('\n');
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_message(notice.as_bytes()).await {
            warn!("Failed to send invalid message notice to {}: {}", self.peer, e);
        }
    }

    /// Drain one frame, or run the timeout sweep.
    ///
    /// Returns `Err` only on a read failure; the caller should then close
    /// the connection.
    pub async fn listen(self: &Arc<Self>) -> Result<ListenOutcome> {
        if self.is_closed() {
            return Ok(ListenOutcome::Closed);
        }

        let mut reader = self.reader.lock().await;
        let idle_deadline = Instant::now() + self.timeout;

        loop {
            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            if self.is_closed() {
                return Ok(ListenOutcome::Closed);
            }

            let deadline = self
                .awaiting
                .earliest_deadline(self.timeout)
                .unwrap_or(idle_deadline);

            let frame = tokio::select! {
                frame = reader.read_frame() => {
                    frame.map_err(|e| CourierError::ListenFailure(e.to_string()))?
                }
                _ = &mut wake => continue,
                _ = tokio::time::sleep_until(deadline.into()) => {
                    if self.awaiting.is_empty() {
                        return Ok(ListenOutcome::Idle);
                    }
                    let expired = self.awaiting.sweep(self.timeout);
                    if expired > 0 {
                        return Ok(ListenOutcome::TimedOut(expired));
                    }
                    continue;
                }
            };

            drop(reader);
            return Ok(self.handle_frame(frame).await);
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) -> ListenOutcome {
        match frame {
            Frame::Message(text) => {
                debug!("[{}→{}] {}", self.peer, self.id, preview(&text));
                match codec::decode(&text) {
                    Ok(Message::Request(request)) => self.dispatch(request),
                    Ok(Message::Response(response)) => self.complete(response),
                    Err(err) => {
                        self.report(&err);
                        if self.side == Side::Server {
                            self.write_notice(&err).await;
                        }
                    }
                }
                if !self.awaiting.is_empty() {
                    self.awaiting.sweep(self.timeout);
                }
                ListenOutcome::Received
            }
            Frame::Rejected(description) => {
                self.report(&CourierError::PeerRejected(description));
                ListenOutcome::Received
            }
            Frame::Closed => {
                info!("Connection {} closed by {}", self.id, self.peer);
                self.close().await;
                ListenOutcome::Closed
            }
        }
    }

    /// Answer a request off the read loop
    fn dispatch(self: &Arc<Self>, request: Request) {
        let messenger = Arc::clone(self);
        tokio::spawn(async move {
            let response = messenger
                .dispatcher
                .accept_request(&messenger, request)
                .await;
            if let Err(err) = messenger.write(&Message::Response(response)).await {
                messenger.report(&err);
            }
        });
    }

    fn complete(&self, response: Response) {
        match self.awaiting.take(&response.id) {
            Some(entry) => entry.resolve(response),
            None => warn!(
                "Received response {} on {} but no request is waiting for it",
                response.id, self.id
            ),
        }
    }

    /// Listen until the connection closes or reading fails
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.listen().await {
                Ok(ListenOutcome::Closed) => break,
                Ok(_) => {}
                Err(err) => {
                    self.report(&err);
                    self.close().await;
                    break;
                }
            }
        }
        debug!("Listen loop for {} exiting", self.id);
    }

    /// Close the connection.
    ///
    /// Pending requests fail with [`CourierError::ConnectionClosed`] and
    /// the listen loop stops. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let abandoned = self.awaiting.fail_all(&CourierError::ConnectionClosed);
        if abandoned > 0 {
            debug!("Closing {} abandoned {} pending requests", self.id, abandoned);
        }
        self.wake.notify_waiters();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.id, e);
        }
    }
}

impl fmt::Debug for Messenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn decode_result<T: DeserializeOwned>(object: Option<Value>) -> Result<Option<T>> {
    object
        .map(serde_json::from_value::<T>)
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receptor::{ExternalError, ParamSpec};
    use crate::transport::split;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: u32,
        name: String,
    }

    fn receptors() -> Arc<ReceptorRegistry> {
        let mut registry = ReceptorRegistry::new();
        registry
            .register("person", vec![ParamSpec::of::<u32>("id")], |mut args| async move {
                let id: u32 = args.take("id")?;
                Ok(Person {
                    id,
                    name: "Steve".into(),
                })
            })
            .register("fail", vec![], |_args| async move {
                Err::<(), _>(anyhow::anyhow!("database password is hunter2"))
            })
            .register("reject", vec![], |_args| async move {
                Err::<(), anyhow::Error>(ExternalError::new("you asked for the impossible").into())
            })
            .register("panic", vec![], |_args| async move {
                let value: Option<u32> = None;
                Ok(value.expect("boom"))
            })
            .register("whoami", vec![ParamSpec::connection("conn")], |mut args| async move {
                let conn: Arc<Messenger> = args.take("conn")?;
                Ok(conn.id().to_string())
            })
            .register("nothing", vec![], |_args| async move { Ok(()) });
        Arc::new(registry)
    }

    fn collecting_hook() -> (ErrorHook, Arc<StdMutex<Vec<CourierError>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let hook: ErrorHook = Arc::new(move |err: &CourierError| sink.lock().unwrap().push(err.clone()));
        (hook, seen)
    }

    fn config(timeout_ms: u64) -> MessengerConfig {
        MessengerConfig {
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Client and server messengers joined by an in-memory pipe, both listening
    fn pair(server_hook: ErrorHook) -> (Arc<Messenger>, Arc<Messenger>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (client_reader, client_writer) = split(a);
        let (server_reader, server_writer) = split(b);

        let client = Messenger::builder(client_reader, client_writer)
            .peer("server")
            .config(config(1000))
            .build();
        let server = Messenger::builder(server_reader, server_writer)
            .side(Side::Server)
            .peer("client")
            .config(config(1000))
            .receptors(receptors())
            .on_error(server_hook)
            .build();

        tokio::spawn(client.clone().run());
        tokio::spawn(server.clone().run());
        (client, server)
    }

    /// A messenger whose peer is a raw pipe end nobody services
    fn lonely(side: Side, timeout_ms: u64, hook: ErrorHook) -> (Arc<Messenger>, DuplexStream) {
        let (a, raw) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = split(a);
        let messenger = Messenger::builder(reader, writer)
            .side(side)
            .config(config(timeout_ms))
            .receptors(receptors())
            .on_error(hook)
            .build();
        (messenger, raw)
    }

    #[tokio::test]
    async fn test_request_returns_typed_record() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        let person = client
            .request_as::<Person>(Request::new("person").param("id", 0))
            .await
            .unwrap();
        assert_eq!(
            person,
            Some(Person {
                id: 0,
                name: "Steve".into()
            })
        );
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_method_lookup_ignores_case() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        let value = client
            .request(Request::new("PERSON").param("id", 7))
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"id": 7, "name": "Steve"})));
    }

    #[tokio::test]
    async fn test_wrong_parameter_type_is_reported_verbatim() {
        let (hook, seen) = collecting_hook();
        let (client, _server) = pair(hook);

        let err = client
            .request(Request::new("person").param("id", "foo"))
            .await
            .unwrap_err();
        match err {
            CourierError::RemoteError { cause } => {
                assert!(cause.starts_with("Invalid parameter 'id'"), "{}", cause);
                assert!(cause.contains("invalid type"), "{}", cause);
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        // External errors are not the server's problem
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_parameter_is_external() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        let err = client.request(Request::new("person")).await.unwrap_err();
        match err {
            CourierError::RemoteError { cause } => {
                assert!(cause.starts_with("Missing parameter 'id'"), "{}", cause)
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_is_noop() {
        let (hook, seen) = collecting_hook();
        let (client, _server) = pair(hook);

        for _ in 0..3 {
            let value = client.request(Request::new("does-not-exist")).await.unwrap();
            assert_eq!(value, None);
        }
        assert_eq!(client.request(Request::new("nothing")).await.unwrap(), None);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let (hook, seen) = collecting_hook();
        let (client, _server) = pair(hook);

        let err = client.request(Request::new("fail")).await.unwrap_err();
        match err {
            CourierError::RemoteError { cause } => {
                assert!(cause.starts_with("Internal Error:"), "{}", cause);
                assert!(!cause.contains("hunter2"), "{}", cause);
            }
            other => panic!("Unexpected error: {:?}", other),
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].to_string().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_internal() {
        let (hook, seen) = collecting_hook();
        let (client, server) = pair(hook);

        let err = client.request(Request::new("panic")).await.unwrap_err();
        match err {
            CourierError::RemoteError { cause } => {
                assert!(cause.starts_with("Internal Error:"), "{}", cause)
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);

        // The connection survives
        assert!(!server.is_closed());
        assert!(client.request(Request::new("nothing")).await.is_ok());
    }

    #[tokio::test]
    async fn test_external_error_from_handler_is_verbatim() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        match client.request(Request::new("reject")).await.unwrap_err() {
            CourierError::RemoteError { cause } => assert_eq!(cause, "you asked for the impossible"),
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_parameter_is_the_receiving_connection() {
        let (hook, _) = collecting_hook();
        let (client, server) = pair(hook);

        let id = client
            .request_as::<String>(Request::new("whoami"))
            .await
            .unwrap();
        assert_eq!(id, Some(server.id().to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_matched_by_id() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let person = client
                    .request_as::<Person>(Request::new("person").param("id", i))
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(person.id, i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_callback_fires_once_on_success() {
        let (hook, _) = collecting_hook();
        let (client, _server) = pair(hook);

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let success_calls = calls.clone();
        let failure_calls = calls.clone();
        client
            .send_request_with::<Person, _, _>(
                Request::new("person").param("id", 3),
                move |person| {
                    success_calls.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(person);
                },
                move |_err| {
                    failure_calls.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await
            .unwrap();

        let person = rx.await.unwrap().unwrap();
        assert_eq!(person.id, 3);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_refused_while_in_flight() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 50, hook);

        let fired = Arc::new(AtomicUsize::new(0));
        let request = Request::new("person").param("id", 1);
        let counter = fired.clone();
        client
            .send_request(request.clone(), |_| {}, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        let counter = fired.clone();
        let err = client
            .send_request(request.clone(), |_| {}, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::IpcError(_)), "{:?}", err);
        assert_eq!(client.pending_requests(), 1);

        // The blocking form is refused the same way instead of hanging
        assert!(matches!(
            client.request(request.clone()).await,
            Err(CourierError::IpcError(_))
        ));

        assert_eq!(client.listen().await.unwrap(), ListenOutcome::TimedOut(1));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Once the first one is settled the id is free again
        client.send_request(request, |_| {}, |_| {}).await.unwrap();
        assert_eq!(client.pending_requests(), 1);
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out_once() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 100, hook);
        tokio::spawn(client.clone().run());

        let failures = Arc::new(StdMutex::new(Vec::new()));
        let sink = failures.clone();
        client
            .send_request(
                Request::new("person").param("id", 1),
                |_object| panic!("no response was sent"),
                move |err| sink.lock().unwrap().push(err),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            CourierError::Timeout { elapsed, .. } => {
                assert!(*elapsed >= Duration::from_millis(100))
            }
            other => panic!("Unexpected error: {:?}", other),
        }
        assert_eq!(client.pending_requests(), 0);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_blocking_request_times_out() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 100, hook);
        tokio::spawn(client.clone().run());

        let request = Request::new("person").param("id", 1);
        let id = request.id;
        let err = client.request(request).await.unwrap_err();
        assert!(err.is_listen_failure());
        match err {
            CourierError::Timeout { id: timed_out, .. } => assert_eq!(timed_out, id),
            other => panic!("Unexpected error: {:?}", other),
        }
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_listen_returns_idle_when_nothing_is_outstanding() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 50, hook);

        assert_eq!(client.listen().await.unwrap(), ListenOutcome::Idle);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_listen_sweeps_outstanding_requests() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 50, hook);

        client
            .send_request(Request::new("a"), |_| {}, |_| {})
            .await
            .unwrap();
        assert_eq!(client.listen().await.unwrap(), ListenOutcome::TimedOut(1));
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_stops_listening() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 5000, hook);

        let (tx, rx) = oneshot::channel();
        client
            .send_request(
                Request::new("person").param("id", 1),
                |_object| panic!("no response was sent"),
                move |err| {
                    let _ = tx.send(err);
                },
            )
            .await
            .unwrap();
        assert_eq!(client.pending_requests(), 1);

        client.close().await;
        assert!(client.is_closed());
        assert_eq!(client.pending_requests(), 0);
        assert!(matches!(rx.await.unwrap(), CourierError::ConnectionClosed));

        assert_eq!(client.listen().await.unwrap(), ListenOutcome::Closed);
        let err = client
            .send_request(Request::new("x"), |_| {}, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_request() {
        let (hook, _) = collecting_hook();
        let (client, _raw) = lonely(Side::Client, 5000, hook);

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.request(Request::new("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await;

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, CourierError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_peer_eof_closes_connection() {
        let (hook, _) = collecting_hook();
        let (client, raw) = lonely(Side::Client, 5000, hook);
        drop(raw);

        assert_eq!(client.listen().await.unwrap(), ListenOutcome::Closed);
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_server_answers_garbage_with_notice() {
        let (hook, seen) = collecting_hook();
        let (server, raw) = lonely(Side::Server, 5000, hook);
        tokio::spawn(server.clone().run());

        let (raw_read, mut raw_write) = tokio::io::split(raw);
        raw_write.write_all(b"this is not json\n---\n").await.unwrap();

        let mut line = String::new();
        BufReader::new(raw_read).read_line(&mut line).await.unwrap();
        assert!(line.starts_with(courier_core::INVALID_MESSAGE_PREFIX), "{}", line);
        assert!(!server.is_closed());
        assert!(matches!(
            seen.lock().unwrap()[0],
            CourierError::MalformedMessage(_)
        ));
    }

    #[tokio::test]
    async fn test_client_routes_notice_to_error_hook() {
        let (hook, seen) = collecting_hook();
        let (client, mut raw) = lonely(Side::Client, 5000, hook);

        raw.write_all(b"Invalid Message: Malformed message: Invalid JSON\n")
            .await
            .unwrap();
        assert_eq!(client.listen().await.unwrap(), ListenOutcome::Received);

        let seen = seen.lock().unwrap();
        match &seen[0] {
            CourierError::PeerRejected(description) => {
                assert_eq!(description, "Malformed message: Invalid JSON")
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }
}
