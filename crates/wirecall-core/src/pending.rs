//! Outstanding outbound calls keyed by correlation id.
//!
//! Every entry owns a one-shot completion slot. Whoever removes the entry
//! from the map resolves the slot, so a reply racing a timeout or a shutdown
//! is observed exactly once and the loser is a no-op.

use crate::codec::{decode_value, ValueCodec};
use crate::error::{Result, WirecallError};
use crate::types::TypeDescriptor;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// How a pending call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The peer answered; the payload still has to be decoded.
    Success(Value),
    /// The peer reported an error of its own.
    RemoteFailure { code: i32, message: String },
    TimedOut,
    ShutDown,
}

type Slot = Box<dyn FnOnce(Outcome, Duration, &dyn ValueCodec) + Send>;

struct PendingCall {
    created_at: Instant,
    /// Own expiry age; `None` falls back to the sweep's default.
    max_age: Option<Duration>,
    slot: Slot,
}

impl PendingCall {
    fn is_expired(&self, now: Instant, default_max_age: Duration) -> bool {
        let max_age = self.max_age.unwrap_or(default_max_age);
        now.saturating_duration_since(self.created_at) > max_age
    }

    fn complete(self, outcome: Outcome, now: Instant, codec: &dyn ValueCodec) {
        let age = now.saturating_duration_since(self.created_at);
        (self.slot)(outcome, age, codec);
    }
}

/// Per-session registry of calls awaiting a reply.
pub struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
    codec: Arc<dyn ValueCodec>,
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingCalls {
    pub fn new(codec: Arc<dyn ValueCodec>) -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            codec,
        }
    }

    /// Track a new call and hand back the future its caller awaits.
    ///
    /// The call expires after the age passed to [`sweep_expired`](Self::sweep_expired).
    pub fn register<T>(&self, id: u64, expected: TypeDescriptor) -> Result<CompletionHandle<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.insert(id, expected, None)
    }

    /// Like [`register`](Self::register), but the call only expires once it
    /// is older than `max_age`, whatever age the sweep uses by default.
    pub fn register_with_max_age<T>(
        &self,
        id: u64,
        expected: TypeDescriptor,
        max_age: Duration,
    ) -> Result<CompletionHandle<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.insert(id, expected, Some(max_age))
    }

    fn insert<T>(
        &self,
        id: u64,
        target: TypeDescriptor,
        max_age: Option<Duration>,
    ) -> Result<CompletionHandle<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot: Slot = Box::new(move |outcome, age, codec| {
            let result = match outcome {
                Outcome::Success(raw) => decode_value::<T>(codec, raw, &target),
                Outcome::RemoteFailure { code, message } => {
                    Err(WirecallError::Remote { code, message })
                }
                Outcome::TimedOut => Err(WirecallError::Timeout(age)),
                Outcome::ShutDown => Err(WirecallError::ConnectionClosed),
            };
            // The caller may have given up already.
            let _ = tx.send(result);
        });

        let mut calls = self.calls.lock();
        if calls.contains_key(&id) {
            return Err(WirecallError::DuplicateCorrelationId(id));
        }
        calls.insert(
            id,
            PendingCall {
                created_at: Instant::now(),
                max_age,
                slot,
            },
        );
        Ok(CompletionHandle { id, rx })
    }

    /// Resolve one call. Returns `false` if the id is no longer pending.
    pub fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let call = self.calls.lock().remove(&id);
        match call {
            Some(call) => {
                call.complete(outcome, Instant::now(), self.codec.as_ref());
                true
            }
            None => false,
        }
    }

    /// Forget a call without resolving it; its handle then reports
    /// `ConnectionClosed`.
    pub fn cancel(&self, id: u64) -> bool {
        self.calls.lock().remove(&id).is_some()
    }

    /// Fail every call older than its own max age with a timeout. Calls
    /// registered without one expire after `default_max_age`.
    pub fn sweep_expired(&self, default_max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingCall> = {
            let mut calls = self.calls.lock();
            let ids: Vec<u64> = calls
                .iter()
                .filter(|(_, call)| call.is_expired(now, default_max_age))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| calls.remove(&id)).collect()
        };

        let count = expired.len();
        for call in expired {
            call.complete(Outcome::TimedOut, now, self.codec.as_ref());
        }
        count
    }

    /// Fail every pending call with `ConnectionClosed` and empty the registry.
    pub fn shutdown(&self) -> usize {
        let now = Instant::now();
        let drained: Vec<PendingCall> = self.calls.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            call.complete(Outcome::ShutDown, now, self.codec.as_ref());
        }
        count
    }

    pub fn contains(&self, id: u64) -> bool {
        self.calls.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Future resolving to the outcome of one registered call.
#[derive(Debug)]
pub struct CompletionHandle<T> {
    id: u64,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> CompletionHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WirecallError::ConnectionClosed)))
    }
}

/// Removes a call from the registry if the caller stops waiting for it.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingCalls, id: u64) -> Self {
        Self {
            pending,
            id,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.cancel(self.id);
        }
    }
}
