use crate::session::Outbound;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// ClientRegistry is the set of live clients on this replica: username to the outbound queue
/// of the session serving it.
#[derive(Clone, Default)]
pub(crate) struct ClientRegistry {
    inner: Arc<Mutex<HashMap<String, LiveClient>>>,
}

#[derive(Debug)]
pub(crate) struct LiveClient {
    outbound: Outbound,
    pub(crate) is_lobby: bool,
}

impl ClientRegistry {
    /// Bind `username` to the session's queue, replacing any previous owner.
    pub(crate) async fn insert(&self, username: &str, outbound: &Outbound, is_lobby: bool) {
        self.inner.lock().await.insert(
            username.to_string(),
            LiveClient {
                outbound: outbound.clone(),
                is_lobby,
            },
        );
    }

    /// Returns false if someone already holds `username`.
    pub(crate) async fn insert_if_absent(&self, username: &str, outbound: &Outbound, is_lobby: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(username) {
            return false;
        }

        inner.insert(
            username.to_string(),
            LiveClient {
                outbound: outbound.clone(),
                is_lobby,
            },
        );
        true
    }

    pub(crate) async fn remove(&self, username: &str) -> Option<LiveClient> {
        self.inner.lock().await.remove(username)
    }

    /// Remove `username` only while it is still bound to `outbound`, so a closing session never
    /// evicts a newer one.
    pub(crate) async fn remove_if_owned(&self, username: &str, outbound: &Outbound) -> Option<LiveClient> {
        let mut inner = self.inner.lock().await;
        match inner.get(username) {
            Some(client) if client.outbound.same_receiver(outbound) => inner.remove(username),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) async fn is_lobby(&self, username: &str) -> Option<bool> {
        self.inner.lock().await.get(username).map(|client| client.is_lobby)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[tokio::test]
    async fn connect_never_steals_a_username() {
        let registry = ClientRegistry::default();
        let (first, _first_rx) = mpsc::unbounded();
        let (second, _second_rx) = mpsc::unbounded();

        assert!(registry.insert_if_absent("alice", &first, false).await);
        assert!(!registry.insert_if_absent("alice", &second, true).await);
        assert_eq!(registry.is_lobby("alice").await, Some(false));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn closing_session_only_removes_its_own_entry() {
        let registry = ClientRegistry::default();
        let (first, _first_rx) = mpsc::unbounded();
        let (second, _second_rx) = mpsc::unbounded();
        registry.insert("alice", &first, false).await;
        registry.insert("alice", &second, false).await;

        assert!(registry.remove_if_owned("alice", &first).await.is_none());
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove_if_owned("alice", &second).await.is_some());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn remove_ignores_owner() {
        let registry = ClientRegistry::default();
        let (outbound, _rx) = mpsc::unbounded();
        registry.insert("lobby-1", &outbound, true).await;

        assert!(registry.remove("lobby-1").await.map_or(false, |client| client.is_lobby));
        assert!(registry.remove("lobby-1").await.is_none());
    }
}
