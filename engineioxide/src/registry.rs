//! The process-wide table of live sessions (C2), keyed by [`Sid`].

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::Session;
use crate::sid::Sid;
use crate::transport::TransportType;

/// Concurrent session table. One instance is shared by an [`EngineIo`]
/// handle and all of its connection-handling tasks.
///
/// [`EngineIo`]: crate::engine::EngineIo
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Sid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh session with a new random id, guaranteed not to
    /// collide with a live session.
    pub fn create(&self, transport: TransportType) -> Arc<Session> {
        loop {
            let sid = Sid::new();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.sessions.entry(sid) {
                let session = Arc::new(Session::new(sid, transport));
                slot.insert(session.clone());
                return session;
            }
        }
    }

    pub fn get(&self, sid: Sid) -> Option<Arc<Session>> {
        self.sessions.get(&sid).map(|entry| entry.clone())
    }

    /// Removes the session from the table. Idempotent: a second call for
    /// the same id is a no-op and returns `None`.
    pub fn destroy(&self, sid: Sid) -> Option<Arc<Session>> {
        self.sessions.remove(&sid).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let reg = SessionRegistry::new();
        let session = reg.create(TransportType::Polling);
        assert_eq!(reg.get(session.id).unwrap().id, session.id);
    }

    #[test]
    fn destroy_is_idempotent() {
        let reg = SessionRegistry::new();
        let session = reg.create(TransportType::Polling);
        assert!(reg.destroy(session.id).is_some());
        assert!(reg.destroy(session.id).is_none());
        assert!(reg.get(session.id).is_none());
    }

    #[test]
    fn unknown_sid_returns_none() {
        let reg = SessionRegistry::new();
        assert!(reg.get(Sid::new()).is_none());
    }
}
