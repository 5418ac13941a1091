//! Conversation history keyed by session id.

use async_trait::async_trait;
use dashmap::DashMap;
use precedent_core::Turn;
use tracing::debug;

use crate::StoreError;

/// Ordered turns per session. Callers serialize access per id; the store
/// itself only guarantees each call is atomic.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All turns for `session_id`, oldest first. Unknown ids have none.
    async fn turns(&self, session_id: &str) -> Result<Vec<Turn>, StoreError>;

    /// Append turns, creating the session on first use.
    async fn append(&self, session_id: &str, turns: &[Turn]) -> Result<(), StoreError>;

    /// Forget a session. Clearing an unknown id is a no-op.
    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;
}

/// Process-lifetime session store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Vec<Turn>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn turns(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turns: &[Turn]) -> Result<(), StoreError> {
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        entry.extend_from_slice(turns);
        debug!(session = session_id, len = entry.len(), "session appended");
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_and_orders() {
        let store = InMemorySessionStore::new();
        assert!(store.turns("s1").await.unwrap().is_empty());

        store
            .append("s1", &[Turn::user("What is consideration?")])
            .await
            .unwrap();
        store
            .append("s1", &[Turn::assistant("A bargained-for exchange.")])
            .await
            .unwrap();

        let turns = store.turns("s1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::user("What is consideration?"));
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_clearable() {
        let store = InMemorySessionStore::new();
        store.append("a", &[Turn::user("one")]).await.unwrap();
        store.append("b", &[Turn::user("two")]).await.unwrap();

        store.clear("a").await.unwrap();
        store.clear("missing").await.unwrap();

        assert!(store.turns("a").await.unwrap().is_empty());
        assert_eq!(store.turns("b").await.unwrap().len(), 1);
    }
}
