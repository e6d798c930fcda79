//! Cancellation token for session background tasks.
//!
//! Each bound connection owns one token. The receive loop, the writer and the
//! expiry sweep all select on it, so cancelling the token stops every task of
//! that connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cancellation token shared between a connection's tasks.
///
/// Cloning yields a handle to the same state; cancelling any clone is
/// observed by all of them.
///
/// # Example
///
/// ```
/// use wirecall::CancellationToken;
///
/// let token = CancellationToken::new();
/// let loop_token = token.clone();
///
/// token.cancel();
/// assert!(loop_token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in [`cancelled`](Self::cancelled).
    ///
    /// Returns `true` only for the call that actually flipped the token.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // Register interest before checking the flag so a concurrent
            // cancel() cannot slip between the check and the wait.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
