use crate::domain::record::{Payload, TransferId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory cache of payload handles keyed by transfer id.
///
/// Cloning shares the same map, so a cache can outlive the registry that
/// filled it. Nothing in here is ever persisted.
#[derive(Debug, Default, Clone)]
pub struct PayloadCache {
    payloads: Arc<RwLock<HashMap<TransferId, Payload>>>,
}

impl PayloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: TransferId, payload: Payload) {
        self.payloads.write().await.insert(id, payload);
    }

    pub async fn get(&self, id: &TransferId) -> Option<Payload> {
        self.payloads.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &TransferId) -> Option<Payload> {
        self.payloads.write().await.remove(id)
    }

    pub async fn contains(&self, id: &TransferId) -> bool {
        self.payloads.read().await.contains_key(id)
    }

    pub async fn clear(&self) {
        self.payloads.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.payloads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payloads.read().await.is_empty()
    }
}
