//! Transfer records and their persisted projection.
//!
//! The live record is owned by the registry; the projection is the only shape
//! that ever reaches durable storage. Conversion between the two lives here so
//! that the status strings and the state enum cannot drift apart.

use super::transfer::{TransferEvent, TransferState};
use crate::error::{PAYLOAD_LOST_MESSAGE, PLACEHOLDER_RETRY_MESSAGE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque transfer identifier, stable for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// File metadata captured at intake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    /// Byte count declared at intake; survives loss of the payload.
    pub size: u64,
    pub mime_type: String,
    /// Epoch milliseconds.
    pub last_modified: i64,
}

/// Handle to the bytes of a file. Never persisted.
#[derive(Debug, Clone)]
pub struct Payload {
    pub meta: FileMeta,
    data: Arc<[u8]>,
}

impl Payload {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: i64,
        data: Vec<u8>,
    ) -> Self {
        let data: Arc<[u8]> = data.into();
        Self {
            meta: FileMeta {
                name: name.into(),
                size: data.len() as u64,
                mime_type: mime_type.into(),
                last_modified,
            },
            data,
        }
    }

    /// Zero-byte stand-in for a payload that was lost, keeping its metadata.
    pub fn placeholder(meta: FileMeta) -> Self {
        Self {
            meta,
            data: Arc::from(Vec::new()),
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self::new(name, mime_type, last_modified, data))
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.meta.mime_type = mime_type.into();
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Live byte count, which is 0 for placeholders.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadMethod {
    Put,
    Post,
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMethod::Put => f.write_str("PUT"),
            UploadMethod::Post => f.write_str("POST"),
        }
    }
}

/// Where the bytes of a reserved transfer go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub remote_id: String,
    pub transmit_target: String,
    pub method: UploadMethod,
}

/// Read-only snapshot of a transfer as held by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub file: FileMeta,
    pub state: TransferState,
    pub progress: u8,
    pub error: Option<String>,
    pub destination: Option<Destination>,
    pub has_cancel_token: bool,
    /// Live payload size, 0 when the payload is missing.
    pub payload_size: u64,
}

impl TransferRecord {
    /// True when the payload was lost and the record cannot be retried until
    /// the file is supplied again.
    pub fn is_placeholder(&self) -> bool {
        self.state == TransferState::Error
            && self.payload_size == 0
            && self.file.size > 0
            && self.error.as_deref().is_some_and(is_payload_lost_message)
    }

    pub fn is_retryable(&self) -> bool {
        self.state == TransferState::Error && !self.is_placeholder()
    }
}

pub fn is_payload_lost_message(message: &str) -> bool {
    message == PAYLOAD_LOST_MESSAGE || message == PLACEHOLDER_RETRY_MESSAGE
}

/// Serializable projection of a transfer, keyed by id in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTransfer {
    pub id: TransferId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub file_last_modified: i64,
    pub progress: u8,
    pub status: TransferState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<UploadMethod>,
}

impl From<&TransferRecord> for PersistedTransfer {
    fn from(record: &TransferRecord) -> Self {
        let destination = record.destination.as_ref();
        Self {
            id: record.id.clone(),
            file_name: record.file.name.clone(),
            file_size: record.file.size,
            file_type: record.file.mime_type.clone(),
            file_last_modified: record.file.last_modified,
            progress: record.progress,
            status: record.state,
            error: record.error.clone(),
            remote_id: destination.map(|d| d.remote_id.clone()),
            upload_url: destination.map(|d| d.transmit_target.clone()),
            method: destination.map(|d| d.method),
        }
    }
}

impl PersistedTransfer {
    pub fn file_meta(&self) -> FileMeta {
        FileMeta {
            name: self.file_name.clone(),
            size: self.file_size,
            mime_type: self.file_type.clone(),
            last_modified: self.file_last_modified,
        }
    }

    /// The destination triple, present only when all three parts were stored.
    pub fn destination(&self) -> Option<Destination> {
        match (&self.remote_id, &self.upload_url, self.method) {
            (Some(remote_id), Some(url), Some(method)) => Some(Destination {
                remote_id: remote_id.clone(),
                transmit_target: url.clone(),
                method,
            }),
            _ => None,
        }
    }

    /// Events that rebuild the stored status from `idle`.
    pub fn replay_events(&self) -> Vec<TransferEvent> {
        let destination = self.destination();
        let message = self
            .error
            .clone()
            .unwrap_or_else(|| "Upload failed".to_string());

        let mut events = vec![TransferEvent::AddFile];
        match self.status {
            TransferState::Idle | TransferState::Queued => {}
            TransferState::Reserving => events.push(TransferEvent::StartReserve),
            TransferState::Ready => {
                events.extend(reserved(destination));
            }
            TransferState::Uploading => {
                events.extend(reserved(destination));
                events.push(TransferEvent::StartUpload);
                events.push(TransferEvent::UploadProgress(self.progress));
            }
            TransferState::Success => {
                events.extend(reserved(destination));
                events.push(TransferEvent::StartUpload);
                events.push(TransferEvent::UploadSuccess);
            }
            TransferState::Error | TransferState::Retrying => {
                events.extend(failed(destination, self.progress, message));
                if self.status == TransferState::Retrying {
                    events.push(TransferEvent::Retry);
                }
            }
            TransferState::Canceled => match destination {
                Some(destination) => {
                    events.extend(reserved(Some(destination)));
                    if self.progress > 0 {
                        events.push(TransferEvent::StartUpload);
                        events.push(TransferEvent::UploadProgress(self.progress));
                    }
                    events.push(TransferEvent::Cancel);
                }
                None => events.push(TransferEvent::Cancel),
            },
        }
        events
    }

    /// Events that land a record whose payload was lost in `error`.
    pub fn placeholder_events(&self) -> Vec<TransferEvent> {
        let mut events = vec![TransferEvent::AddFile];
        events.extend(failed(
            self.destination(),
            0,
            PAYLOAD_LOST_MESSAGE.to_string(),
        ));
        events
    }
}

fn reserved(destination: Option<Destination>) -> Vec<TransferEvent> {
    match destination {
        Some(destination) => vec![
            TransferEvent::StartReserve,
            TransferEvent::ReserveSuccess(destination),
        ],
        // A ready record without a destination cannot be rebuilt faithfully.
        None => vec![
            TransferEvent::StartReserve,
            TransferEvent::ReserveError("Destination missing after restart".to_string()),
        ],
    }
}

fn failed(destination: Option<Destination>, progress: u8, message: String) -> Vec<TransferEvent> {
    match destination {
        Some(destination) => {
            let mut events = vec![
                TransferEvent::StartReserve,
                TransferEvent::ReserveSuccess(destination),
                TransferEvent::StartUpload,
            ];
            if progress > 0 {
                events.push(TransferEvent::UploadProgress(progress));
            }
            events.push(TransferEvent::UploadError(message));
            events
        }
        None => vec![
            TransferEvent::StartReserve,
            TransferEvent::ReserveError(message),
        ],
    }
}
