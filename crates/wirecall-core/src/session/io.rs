//! Per-connection background tasks: reader, writer and expiry sweep.

use super::{DisconnectReason, Session, SessionEvent, SessionInner};
use crate::cancel::CancellationToken;
use crate::codec::{InboundCall, Message, Reply, ReplyOutcome};
use crate::error::{Result, WirecallError};
use crate::pending::Outcome;
use crate::session::ConnectionId;
use crate::transport::BoxedStream;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Read bytes, decode messages and route them until the stream ends.
pub(super) async fn receive_loop(
    inner: Arc<SessionInner>,
    connection: ConnectionId,
    mut reader: ReadHalf<BoxedStream>,
    cancel: CancellationToken,
) {
    let chunk = inner.options.read_buffer_size.max(1);
    let mut buf = BytesMut::with_capacity(chunk);

    let reason = loop {
        if let Err(e) = inner.drain(&mut buf) {
            break DisconnectReason::Fault(e.to_string());
        }

        buf.reserve(chunk);
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => break DisconnectReason::EndOfStream,
                Ok(_) => {}
                Err(e) => break DisconnectReason::Fault(e.to_string()),
            },
        }
    };

    inner.teardown(connection, reason);
}

/// Write queued frames in order. A failed write tears the connection down.
pub(super) async fn write_loop(
    inner: Arc<SessionInner>,
    connection: ConnectionId,
    mut writer: WriteHalf<BoxedStream>,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound.recv() => {
                let Some(frame) = next else { break };
                let written = match writer.write_all(&frame).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    inner.teardown(connection, DisconnectReason::Fault(e.to_string()));
                    break;
                }
            }
        }
    }

    // Signal end-of-stream to the peer.
    let _ = writer.shutdown().await;
}

/// Periodically fail pending calls past their max age, the call timeout by default.
pub(super) async fn sweep_loop(
    inner: Weak<SessionInner>,
    cancel: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        let expired = inner.pending.sweep_expired(inner.options.call_timeout);
        if expired > 0 {
            debug!("Session {} timed out {} pending calls", inner.id, expired);
        }
    }
}

impl SessionInner {
    /// Decode and route every complete message in `buf`.
    ///
    /// Per-message failures are logged and skipped; only connection-level
    /// errors are returned.
    fn drain(self: &Arc<Self>, buf: &mut BytesMut) -> Result<()> {
        loop {
            match self.codec.decode(buf) {
                Ok(Some(message)) => self.route(message),
                Ok(None) => return Ok(()),
                Err(e) if e.is_connection_level() => return Err(e),
                Err(e) => warn!("Session {} dropped an inbound message: {}", self.id, e),
            }
        }
    }

    fn route(self: &Arc<Self>, message: Message) {
        match message {
            Message::Reply(Reply { id, outcome }) => {
                let outcome = match outcome {
                    ReplyOutcome::Success(payload) => Outcome::Success(payload),
                    ReplyOutcome::Failure { code, message } => {
                        Outcome::RemoteFailure { code, message }
                    }
                };
                if !self.pending.resolve(id, outcome) {
                    debug!("Session {} ignored reply {} with no pending call", self.id, id);
                }
            }
            Message::Call(call) => {
                tokio::spawn(self.clone().handle_call(call));
            }
        }
    }

    /// Run one inbound call and send its reply, if it expects one.
    async fn handle_call(self: Arc<Self>, call: InboundCall) {
        let session = Session {
            inner: self.clone(),
        };
        let started = Instant::now();
        let id = call.id;
        let action = call.action.clone();

        let dispatched = AssertUnwindSafe(self.dispatcher.dispatch(&session, call))
            .catch_unwind()
            .await;
        let result = dispatched.unwrap_or_else(|_| {
            Err(WirecallError::Invocation {
                action: action.clone(),
                message: "panicked during dispatch".to_string(),
                source: None,
            })
        });

        let _ = self.events.send(SessionEvent::CallCompleted {
            action: action.clone(),
            elapsed: started.elapsed(),
            success: result.is_ok(),
        });

        match id {
            Some(id) => {
                let reply = Message::Reply(Reply::from_result(id, &result));
                if let Err(e) = self.send(&reply).await {
                    debug!(
                        "Session {} could not reply to {} ({}): {}",
                        self.id, action, id, e
                    );
                }
            }
            None => {
                if let Err(e) = result {
                    debug!("Session {} notification {} failed: {}", self.id, action, e);
                }
            }
        }
    }
}
