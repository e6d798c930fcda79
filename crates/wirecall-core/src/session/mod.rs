//! Transport sessions.
//!
//! A [`Session`] is one logical, possibly reconnectable connection. It owns
//! at most one underlying stream at a time and three background tasks per
//! bound stream: the receive loop, the writer and the expiry sweep. All of
//! them stop on the connection's [`CancellationToken`].
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      └──────────failed────────┘   close / EOF / fault
//!      ▲                                           │
//!      └───────────────────────────────────────────┘
//! ```

mod group;
mod io;
mod state;
mod tags;

pub use group::SessionGroup;
pub use state::{
    ConnectOutcome, ConnectionId, DisconnectReason, ReconnectOutcome, SessionEvent, SessionId,
    SessionState,
};
pub use tags::TagBag;

use crate::action::ActionRegistry;
use crate::cancel::CancellationToken;
use crate::codec::{
    InboundCall, JsonFrameCodec, JsonValueCodec, Message, MessageCodec, ValueCodec,
};
use crate::config::{CallConfig, SessionOptions};
use crate::dispatch::Dispatcher;
use crate::error::{Result, WirecallError};
use crate::pending::{Outcome, PendingCalls, PendingGuard};
use crate::transport::{BoxedStream, Connector, TcpConnector};
use crate::types::{Describe, TypeDescriptor};
use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct ConnectFailure {
    endpoint: String,
    message: String,
}

type ConnectResult = std::result::Result<ConnectOutcome, ConnectFailure>;
type ConnectAttempt = Shared<BoxFuture<'static, ConnectResult>>;

/// The currently bound connection.
struct Link {
    id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

pub(crate) struct SessionInner {
    id: SessionId,
    options: SessionOptions,
    connector: Option<Arc<dyn Connector>>,
    codec: Arc<dyn MessageCodec>,
    dispatcher: Dispatcher,
    pending: PendingCalls,
    state: watch::Sender<SessionState>,
    endpoint: Mutex<Option<String>>,
    /// In-flight connect attempt, shared by concurrent callers.
    attempt: Mutex<Option<ConnectAttempt>>,
    link: Mutex<Option<Link>>,
    tags: TagBag,
    events: broadcast::Sender<SessionEvent>,
    next_call_id: AtomicU64,
    next_connection_id: AtomicU64,
    group: Option<SessionGroup>,
}

/// Handle to a session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("endpoint", &self.remote_endpoint())
            .finish()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    options: SessionOptions,
    connector: Option<Arc<dyn Connector>>,
    codec: Arc<dyn MessageCodec>,
    value_codec: Arc<dyn ValueCodec>,
    registry: Arc<ActionRegistry>,
    group: Option<SessionGroup>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            options: SessionOptions::default(),
            connector: Some(Arc::new(TcpConnector::default())),
            codec: Arc::new(JsonFrameCodec::default()),
            value_codec: Arc::new(JsonValueCodec::new()),
            registry: Arc::new(ActionRegistry::new()),
            group: None,
        }
    }
}

impl SessionBuilder {
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Connector used by `connect`. Defaults to [`TcpConnector`].
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build a session that can only be attached to accepted streams.
    pub fn without_connector(mut self) -> Self {
        self.connector = None;
        self
    }

    pub fn codec(mut self, codec: impl MessageCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn value_codec(mut self, codec: impl ValueCodec) -> Self {
        self.value_codec = Arc::new(codec);
        self
    }

    /// Actions the peer may call on this session.
    pub fn registry(mut self, registry: Arc<ActionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn group(mut self, group: SessionGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub fn build(self) -> Session {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(CallConfig::EVENT_CHANNEL_CAPACITY);
        Session {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                options: self.options,
                connector: self.connector,
                codec: self.codec,
                dispatcher: Dispatcher::new(self.registry, self.value_codec.clone()),
                pending: PendingCalls::new(self.value_codec),
                state,
                endpoint: Mutex::new(None),
                attempt: Mutex::new(None),
                link: Mutex::new(None),
                tags: TagBag::new(),
                events,
                next_call_id: AtomicU64::new(1),
                next_connection_id: AtomicU64::new(1),
                group: self.group,
            }),
        }
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Follow state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().is_some()
    }

    /// Identity of the bound connection, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.inner.link.lock().as_ref().map(|link| link.id)
    }

    /// Last endpoint this session connected to or was accepted from.
    pub fn remote_endpoint(&self) -> Option<String> {
        self.inner.endpoint.lock().clone()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn tags(&self) -> &TagBag {
        &self.inner.tags
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        self.inner.dispatcher.registry()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Outbound calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Other live sessions of the same server.
    pub fn peers(&self) -> Vec<Session> {
        match &self.inner.group {
            Some(group) => group.others(self.inner.id),
            None => Vec::new(),
        }
    }

    /// Connect to `endpoint` unless already connected.
    ///
    /// Concurrent callers share a single attempt and observe its outcome,
    /// whichever endpoint they passed.
    pub async fn connect(&self, endpoint: impl Into<String>) -> Result<ConnectOutcome> {
        let endpoint = endpoint.into();
        let attempt = {
            let mut attempt = self.inner.attempt.lock();
            if let Some(id) = self.connection_id() {
                return Ok(ConnectOutcome::AlreadyConnected(id));
            }
            match attempt.as_ref() {
                Some(in_flight) => {
                    debug!("Session {} joining connect in flight", self.inner.id);
                    in_flight.clone()
                }
                None => {
                    let connector =
                        self.inner.connector.clone().ok_or_else(|| WirecallError::Config {
                            message: format!(
                                "session {} has no connector and cannot open connections",
                                self.inner.id
                            ),
                        })?;
                    let fresh = self.inner.start_connect(connector, endpoint);
                    *attempt = Some(fresh.clone());
                    fresh
                }
            }
        };

        attempt.await.map_err(|failure| WirecallError::ConnectFailed {
            endpoint: failure.endpoint,
            message: failure.message,
        })
    }

    /// Connect again to the last-known endpoint.
    ///
    /// A connected session is left alone and reported as
    /// [`ReconnectOutcome::NoOp`].
    pub async fn reconnect(&self) -> Result<ReconnectOutcome> {
        if let Some(id) = self.connection_id() {
            return Ok(ReconnectOutcome::NoOp(id));
        }
        let endpoint = self.remote_endpoint().ok_or(WirecallError::NoEndpoint)?;
        match self.connect(endpoint).await? {
            ConnectOutcome::Connected(id) => Ok(ReconnectOutcome::Reconnected(id)),
            ConnectOutcome::AlreadyConnected(id) => Ok(ReconnectOutcome::NoOp(id)),
        }
    }

    /// Bind an already open stream, e.g. one accepted by a listener.
    pub fn attach(&self, stream: BoxedStream, remote: impl Into<String>) -> Result<ConnectionId> {
        let attempt = self.inner.attempt.lock();
        if self.is_connected() || attempt.is_some() {
            return Err(WirecallError::Config {
                message: format!("session {} already has a connection", self.inner.id),
            });
        }
        let remote = remote.into();
        *self.inner.endpoint.lock() = Some(remote.clone());
        let connection = self.inner.bind(stream, &remote);
        drop(attempt);
        Ok(connection)
    }

    /// Close the bound connection. Returns `false` if there was none.
    ///
    /// Pending calls fail with `ConnectionClosed`.
    pub fn close(&self) -> bool {
        match self.connection_id() {
            Some(connection) => self.inner.teardown(connection, DisconnectReason::Closed),
            None => false,
        }
    }

    /// Call a remote action and wait for its reply.
    ///
    /// Waits at most the session's call timeout.
    pub async fn call<T>(&self, action: &str, args: Vec<Value>) -> Result<T>
    where
        T: DeserializeOwned + Describe + Send + 'static,
    {
        self.call_with_timeout(action, args, self.inner.options.call_timeout)
            .await
    }

    /// Call a remote action with an explicit deadline.
    pub async fn call_with_timeout<T>(
        &self,
        action: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned + Describe + Send + 'static,
    {
        let inner = &self.inner;
        let id = inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let mut handle = inner
            .pending
            .register_with_max_age::<T>(id, TypeDescriptor::of::<T>(), timeout)?;
        let mut guard = PendingGuard::new(&inner.pending, id);

        inner
            .send(&Message::Call(InboundCall::new(Some(id), action, args)))
            .await?;
        debug!("Session {} sent call {} ({})", inner.id, action, id);

        let result = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(result) => result,
            Err(_) => {
                inner.pending.resolve(id, Outcome::TimedOut);
                (&mut handle).await
            }
        };
        guard.disarm();
        result
    }

    /// Invoke a remote action without waiting for, or receiving, a reply.
    pub async fn notify(&self, action: &str, args: Vec<Value>) -> Result<()> {
        self.inner
            .send(&Message::Call(InboundCall::new(None, action, args)))
            .await
    }

    /// Like [`notify`](Self::notify), reporting failure as `false`.
    pub async fn try_notify(&self, action: &str, args: Vec<Value>) -> bool {
        match self.notify(action, args).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Session {} could not notify {}: {}", self.inner.id, action, e);
                false
            }
        }
    }
}

impl SessionInner {
    fn start_connect(self: &Arc<Self>, connector: Arc<dyn Connector>, endpoint: String) -> ConnectAttempt {
        self.state.send_replace(SessionState::Connecting);
        *self.endpoint.lock() = Some(endpoint.clone());

        let inner = self.clone();
        let target = endpoint.clone();
        let task = tokio::spawn(async move { inner.establish(connector, target).await });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ConnectFailure {
                    endpoint,
                    message: format!("connect task failed: {}", e),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn establish(self: Arc<Self>, connector: Arc<dyn Connector>, endpoint: String) -> ConnectResult {
        debug!("Session {} connecting to {}", self.id, endpoint);
        let timeout = self.options.connect_timeout;

        let opened = tokio::time::timeout(timeout, connector.connect(&endpoint)).await;
        let result = match opened {
            Ok(Ok(stream)) => Ok(ConnectOutcome::Connected(self.bind(stream, &endpoint))),
            Ok(Err(e)) => Err(ConnectFailure {
                endpoint,
                message: e.to_string(),
            }),
            Err(_) => Err(ConnectFailure {
                endpoint,
                message: format!("timed out after {:?}", timeout),
            }),
        };

        if let Err(failure) = &result {
            self.state.send_replace(SessionState::Disconnected);
            warn!(
                "Session {} failed to connect to {}: {}",
                self.id, failure.endpoint, failure.message
            );
        }
        self.attempt.lock().take();
        result
    }

    /// Make `stream` the active connection and start its tasks.
    fn bind(self: &Arc<Self>, stream: BoxedStream, remote: &str) -> ConnectionId {
        let connection = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.options.outbound_queue_depth.max(1));
        let cancel = CancellationToken::new();

        let stale = self.link.lock().replace(Link {
            id: connection,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });
        if let Some(stale) = stale {
            stale.cancel.cancel();
        }
        self.state.send_replace(SessionState::Connected);
        if let Some(group) = &self.group {
            group.join(self);
        }

        tokio::spawn(io::write_loop(
            self.clone(),
            connection,
            writer,
            outbound_rx,
            cancel.clone(),
        ));
        tokio::spawn(io::receive_loop(
            self.clone(),
            connection,
            reader,
            cancel.clone(),
        ));
        tokio::spawn(io::sweep_loop(
            Arc::downgrade(self),
            cancel,
            self.options.sweep_interval,
        ));

        info!("Session {} connected to {} ({})", self.id, remote, connection);
        let _ = self.events.send(SessionEvent::Connected {
            connection,
            remote: remote.to_string(),
        });
        connection
    }

    /// Tear down `connection` if it is still the bound one.
    ///
    /// Stops its tasks, fails every pending call and reports the
    /// disconnect. Returns `false` if the connection was already gone.
    fn teardown(&self, connection: ConnectionId, reason: DisconnectReason) -> bool {
        let link = {
            let mut link = self.link.lock();
            match link.as_ref() {
                Some(current) if current.id == connection => link.take(),
                _ => None,
            }
        };
        let Some(link) = link else {
            return false;
        };

        link.cancel.cancel();
        let failed = self.pending.shutdown();
        self.state.send_replace(SessionState::Disconnected);
        if let Some(group) = &self.group {
            group.leave(self.id);
        }

        info!(
            "Session {} disconnected ({}): {}, {} pending calls failed",
            self.id, connection, reason, failed
        );
        let _ = self.events.send(SessionEvent::Disconnected { connection, reason });
        true
    }

    /// Encode `message` and queue it for the writer.
    async fn send(&self, message: &Message) -> Result<()> {
        let mut buf = BytesMut::new();
        self.codec.encode(message, &mut buf)?;

        let outbound = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(WirecallError::NotConnected)?;
        outbound
            .send(buf.freeze())
            .await
            .map_err(|_| WirecallError::ConnectionClosed)
    }
}
