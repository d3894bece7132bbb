use super::record::{Destination, FileMeta, Payload, PersistedTransfer, TransferId};
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Durable keyed store for transfer projections.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn put(&self, projection: PersistedTransfer) -> Result<()>;
    async fn get(&self, id: &TransferId) -> Result<Option<PersistedTransfer>>;
    async fn delete(&self, id: &TransferId) -> Result<()>;
    async fn all(&self) -> Result<Vec<PersistedTransfer>>;
    async fn clear(&self) -> Result<()>;
}

pub type ProjectionStoreBox = Box<dyn ProjectionStore>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
}

impl From<&FileMeta> for ReserveRequest {
    fn from(meta: &FileMeta) -> Self {
        Self {
            file_name: meta.name.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
        }
    }
}

/// Final report sent to the backend once a transmit has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub bytes: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl ConfirmRequest {
    pub fn succeeded(bytes: u64) -> Self {
        Self {
            bytes,
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            bytes: 0,
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Remote service that hands out destinations and records completions.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn reserve(&self, request: ReserveRequest) -> std::result::Result<Destination, BackendError>;
    async fn confirm(
        &self,
        remote_id: &str,
        request: ConfirmRequest,
    ) -> std::result::Result<(), BackendError>;
}

/// Called with `(loaded, total)` byte counts as the transmit advances.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Byte transport. Must return `TransferError::CanceledError` promptly once
/// `cancel` fires, and any other failure as `TransferError::TransportError`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn transmit(
        &self,
        destination: &Destination,
        payload: &Payload,
        on_progress: ProgressFn<'_>,
        cancel: CancellationToken,
    ) -> Result<()>;
}
