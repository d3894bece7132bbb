use crate::domain::ports::ProjectionStore;
use crate::domain::record::{PersistedTransfer, TransferId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory projection store.
///
/// Uses `Arc<RwLock<HashMap<TransferId, PersistedTransfer>>>`; clones share
/// the same map, so a second registry built over a clone sees what the first
/// one persisted, the way a restart would against durable storage.
#[derive(Default, Clone)]
pub struct InMemoryProjectionStore {
    projections: Arc<RwLock<HashMap<TransferId, PersistedTransfer>>>,
}

impl InMemoryProjectionStore {
    /// Creates a new, empty in-memory projection store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn put(&self, projection: PersistedTransfer) -> Result<()> {
        let mut projections = self.projections.write().await;
        projections.insert(projection.id.clone(), projection);
        Ok(())
    }

    async fn get(&self, id: &TransferId) -> Result<Option<PersistedTransfer>> {
        let projections = self.projections.read().await;
        Ok(projections.get(id).cloned())
    }

    async fn delete(&self, id: &TransferId) -> Result<()> {
        self.projections.write().await.remove(id);
        Ok(())
    }

    /// Ordered by id, which for generated ids is creation order.
    async fn all(&self) -> Result<Vec<PersistedTransfer>> {
        let projections = self.projections.read().await;
        let mut all: Vec<PersistedTransfer> = projections.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn clear(&self) -> Result<()> {
        self.projections.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer::TransferState;

    fn projection(id: &str) -> PersistedTransfer {
        PersistedTransfer {
            id: TransferId::new(id),
            file_name: format!("{id}.txt"),
            file_size: 10,
            file_type: "text/plain".into(),
            file_last_modified: 0,
            progress: 0,
            status: TransferState::Queued,
            error: None,
            remote_id: None,
            upload_url: None,
            method: None,
        }
    }

    #[tokio::test]
    async fn test_in_memory_projection_store() {
        let store = InMemoryProjectionStore::new();
        store.put(projection("b")).await.unwrap();
        store.put(projection("a")).await.unwrap();

        let retrieved = store.get(&TransferId::new("a")).await.unwrap().unwrap();
        assert_eq!(retrieved, projection("a"));
        assert!(store.get(&TransferId::new("c")).await.unwrap().is_none());

        let ids: Vec<String> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = InMemoryProjectionStore::new();
        let reopened = store.clone();
        store.put(projection("a")).await.unwrap();
        store.put(projection("b")).await.unwrap();

        store.delete(&TransferId::new("a")).await.unwrap();
        assert_eq!(reopened.all().await.unwrap().len(), 1);

        reopened.clear().await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
    }
}
