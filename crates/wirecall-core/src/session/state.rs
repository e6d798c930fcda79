//! Session identity, lifecycle states and observable events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a session. Survives reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one underlying connection bound to a session.
///
/// Each successful connect binds a new connection, so comparing ids tells a
/// kept connection apart from a replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Result of a successful [`connect`](super::Session::connect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was opened and bound.
    Connected(ConnectionId),
    /// The session was already connected; nothing was opened.
    AlreadyConnected(ConnectionId),
}

impl ConnectOutcome {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            ConnectOutcome::Connected(id) | ConnectOutcome::AlreadyConnected(id) => *id,
        }
    }
}

/// Result of a successful [`reconnect`](super::Session::reconnect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The session was connected; the existing connection is untouched.
    NoOp(ConnectionId),
    /// A new connection to the last-known endpoint was bound.
    Reconnected(ConnectionId),
}

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`close`](super::Session::close) was called locally.
    Closed,
    /// The peer closed its end of the stream.
    EndOfStream,
    /// A read, write or framing failure.
    Fault(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed locally"),
            DisconnectReason::EndOfStream => f.write_str("end of stream"),
            DisconnectReason::Fault(message) => write!(f, "fault: {}", message),
        }
    }
}

/// Events published on [`Session::subscribe`](super::Session::subscribe).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        connection: ConnectionId,
        remote: String,
    },
    Disconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    /// An inbound call finished, successfully or not.
    CallCompleted {
        action: String,
        elapsed: Duration,
        success: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionId::new(3).to_string(), "conn-3");
        assert_eq!(SessionState::Connecting.to_string(), "connecting");
        assert_eq!(
            DisconnectReason::Fault("reset".to_string()).to_string(),
            "fault: reset"
        );
    }

    #[test]
    fn test_connect_outcome_exposes_connection() {
        let id = ConnectionId::new(9);
        assert_eq!(ConnectOutcome::Connected(id).connection_id(), id);
        assert_eq!(ConnectOutcome::AlreadyConnected(id).connection_id(), id);
    }
}
