//! Hostname -> session lookup table shared by the handshake and the public
//! handler.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::session::TunnelSession;

#[derive(Clone, Default)]
pub struct TunnelRegistry {
    sessions: Arc<DashMap<String, Arc<TunnelSession>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Registers `session` under its hostname, replacing and closing
    /// whatever session previously held it. The old session's own `close()`
    /// sees a mismatched identity in [`Self::unregister_if`] and no-ops, so
    /// this never races the old session's closing itself out of the new
    /// entry.
    pub fn register(&self, session: Arc<TunnelSession>) {
        let hostname = session.hostname().to_string();
        if let Some((_, evicted)) = self.sessions.remove(&hostname) {
            evicted.close();
        }
        self.sessions.insert(hostname, session);
    }

    /// Removes the entry for `hostname` only if it still points at the
    /// session identified by `id`. Called from a session's `on_close`
    /// callback, where `id` is that session's own identity — this is what
    /// keeps a just-replaced (and now closing) session from deleting the
    /// entry its successor installed.
    pub fn unregister_if(&self, hostname: &str, id: Uuid) {
        self.sessions.remove_if(hostname, |_, session| session.id() == id);
    }

    pub fn lookup(&self, hostname: &str) -> Option<Arc<TunnelSession>> {
        self.sessions.get(hostname).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has(&self, hostname: &str) -> bool {
        self.sessions.contains_key(hostname)
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
    use std::time::Duration;

    fn session(hostname: &str, registry: TunnelRegistry) -> Arc<TunnelSession> {
        let hostname = hostname.to_string();
        let (writer, _reader) = tokio::io::duplex(64);
        TunnelSession::spawn(
            hostname.clone(),
            "anonymous".to_string(),
            10,
            Duration::from_secs(5),
            writer,
            Box::new(move |id, host| registry.unregister_if(host, id)),
        )
    }

    #[tokio::test]
    async fn register_replaces_and_closes_the_previous_session() {
        let registry = TunnelRegistry::new();
        let first = session("a.example.com", registry.clone());
        registry.register(Arc::clone(&first));
        assert!(registry.has("a.example.com"));

        let second = session("a.example.com", registry.clone());
        registry.register(Arc::clone(&second));

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.lookup("a.example.com").unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn evicted_sessions_on_close_do_not_unregister_the_replacement() {
        let registry = TunnelRegistry::new();
        let first = session("b.example.com", registry.clone());
        registry.register(Arc::clone(&first));
        let second = session("b.example.com", registry.clone());
        registry.register(Arc::clone(&second));

        first.close();
        assert!(registry.has("b.example.com"));
        assert_eq!(registry.lookup("b.example.com").unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn unregister_if_removes_matching_identity() {
        let registry = TunnelRegistry::new();
        let only = session("c.example.com", registry.clone());
        registry.register(Arc::clone(&only));
        only.close();
        assert!(!registry.has("c.example.com"));
    }
}
