//! Live sessions sharing one server.

use super::{Session, SessionId, SessionInner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Set of connected sessions accepted by the same listener.
///
/// Members join when a connection is bound and leave when it is torn down.
/// The group holds weak references only.
#[derive(Clone, Default)]
pub struct SessionGroup {
    members: Arc<Mutex<HashMap<SessionId, Weak<SessionInner>>>>,
}

impl std::fmt::Debug for SessionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGroup")
            .field("members", &self.members.lock().len())
            .finish()
    }
}

impl SessionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn join(&self, inner: &Arc<SessionInner>) {
        self.members.lock().insert(inner.id, Arc::downgrade(inner));
    }

    pub(super) fn leave(&self, id: SessionId) {
        self.members.lock().remove(&id);
    }

    /// Every live member, ordered by session id.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = {
            let mut members = self.members.lock();
            members.retain(|_, weak| weak.strong_count() > 0);
            members
                .values()
                .filter_map(Weak::upgrade)
                .map(|inner| Session { inner })
                .collect()
        };
        sessions.sort_by_key(Session::id);
        sessions
    }

    /// Every live member except `id`.
    pub fn others(&self, id: SessionId) -> Vec<Session> {
        self.sessions()
            .into_iter()
            .filter(|session| session.id() != id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every member. Returns how many were connected.
    pub fn close_all(&self) -> usize {
        self.sessions()
            .iter()
            .filter(|session| session.close())
            .count()
    }
}
