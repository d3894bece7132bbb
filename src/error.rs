use thiserror::Error;

/// Message stored on a transfer whose payload did not survive a restart.
pub const PAYLOAD_LOST_MESSAGE: &str =
    "File data was lost when the application restarted. Please select the file again.";

/// Message stored when a retry is attempted on a transfer without payload.
pub const PLACEHOLDER_RETRY_MESSAGE: &str =
    "Cannot retry: the file data is no longer available. Re-select the file to upload it.";

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Reservation failed ({status}): {message}")]
    ReservationError { status: u16, message: String },
    #[error("Transport error: {0}")]
    TransportError(String),
    #[error("Upload canceled")]
    CanceledError,
    #[error("Confirm notification failed: {0}")]
    ConfirmNotifyError(String),
    #[error("{}", PLACEHOLDER_RETRY_MESSAGE)]
    PlaceholderRetryError,
    #[error("Storage error: {0}")]
    StorageError(Box<dyn std::error::Error + Send + Sync>),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for TransferError {
    fn from(e: rocksdb::Error) -> Self {
        TransferError::StorageError(Box::new(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Bad input; retrying the same request will not help.
    Validation,
    /// Rate limit, server error or unavailability.
    Transient,
}

/// Failure reported by the remote upload service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (status {status})")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub status: u16,
    pub message: String,
}

impl BackendError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Validation,
            status: 400,
            message: message.into(),
        }
    }

    pub fn transient(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Transient,
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == BackendErrorKind::Transient
    }
}

impl From<BackendError> for TransferError {
    fn from(e: BackendError) -> Self {
        TransferError::ReservationError {
            status: e.status,
            message: e.message,
        }
    }
}
