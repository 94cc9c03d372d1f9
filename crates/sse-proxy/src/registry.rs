//! Session id → [`Session`] map shared by the relay and the interceptor.

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::Session;

/// Concurrent session store. Cloning yields another handle to the same map.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session`, returning whatever was registered under its id.
    pub fn put(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions.insert(session.id().to_string(), session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove `session` only if it is still the entry under its id.
    pub fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register `session` for the lifetime of the returned lease.
    pub fn register(&self, session: Session) -> SessionLease {
        let session = Arc::new(session);
        if let Some(previous) = self.put(Arc::clone(&session)) {
            tracing::warn!(
                session_id = %previous.id(),
                "session id reissued by upstream, replacing previous stream"
            );
        }
        SessionLease {
            registry: self.clone(),
            session,
        }
    }
}

/// Registry entry and done signal, released together.
///
/// Dropping the lease removes the entry (unless a newer session has taken
/// the id) and fires the session's done signal.
#[derive(Debug)]
pub struct SessionLease {
    registry: SessionRegistry,
    session: Arc<Session>,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.remove_if_same(&self.session);
        self.session.writer().close();
        tracing::debug!(session_id = %self.session.id(), "session released");
    }
}
