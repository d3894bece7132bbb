//! Upload backend and transport over a local directory.
//!
//! Each reservation gets its own directory under the configured root; the
//! transmit target is a `file://` URL inside it and confirmation writes a JSON
//! receipt next to the uploaded file.

use crate::config::LocalBackendConfig;
use crate::domain::ports::{ConfirmRequest, ProgressFn, ReserveRequest, Transport, UploadBackend};
use crate::domain::record::{Destination, Payload, UploadMethod};
use crate::error::{BackendError, Result, TransferError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RECEIPT_FILE: &str = ".receipt.json";
const ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LENGTH: usize = 9;

/// What the backend recorded when an upload was confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub remote_id: String,
    pub file_name: String,
    pub bytes: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub confirmed_at: String,
}

#[derive(Default)]
struct Ledger {
    reservations: HashMap<String, ReserveRequest>,
    receipts: HashMap<String, Receipt>,
}

pub struct LocalDirectoryBackend {
    root: PathBuf,
    chunk_size: usize,
    method: UploadMethod,
    ledger: Mutex<Ledger>,
}

impl LocalDirectoryBackend {
    pub fn new(config: LocalBackendConfig) -> Self {
        let root = std::path::absolute(&config.root).unwrap_or(config.root);
        Self {
            root,
            chunk_size: config.chunk_size.max(1),
            method: config.method,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn receipt(&self, remote_id: &str) -> Option<Receipt> {
        self.ledger.lock().await.receipts.get(remote_id).cloned()
    }

    async fn write_chunks(
        &self,
        path: &Path,
        method: UploadMethod,
        payload: &Payload,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut file = match method {
            UploadMethod::Put => fs::File::create(path).await?,
            UploadMethod::Post => OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
                .map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => {
                        TransferError::TransportError(format!("{} already exists", path.display()))
                    }
                    _ => TransferError::IoError(e),
                })?,
        };

        let total = payload.len();
        let mut loaded = 0u64;
        for chunk in payload.bytes().chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                drop(file);
                remove_partial(path).await;
                return Err(TransferError::CanceledError);
            }
            if let Err(e) = file.write_all(chunk).await {
                drop(file);
                remove_partial(path).await;
                return Err(e.into());
            }
            loaded += chunk.len() as u64;
            on_progress(loaded, total);
        }

        if let Err(e) = file.flush().await {
            drop(file);
            remove_partial(path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl UploadBackend for LocalDirectoryBackend {
    async fn reserve(&self, request: ReserveRequest) -> std::result::Result<Destination, BackendError> {
        validate_reserve(&request)?;

        let remote_id = remote_id();
        let dir = self.root.join(&remote_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| BackendError::transient(503, e.to_string()))?;

        let target = dir.join(&request.file_name);
        debug!(remote_id = %remote_id, file = %request.file_name, "destination reserved");
        self.ledger
            .lock()
            .await
            .reservations
            .insert(remote_id.clone(), request);

        Ok(Destination {
            remote_id,
            transmit_target: format!("file://{}", target.display()),
            method: self.method,
        })
    }

    async fn confirm(
        &self,
        remote_id: &str,
        request: ConfirmRequest,
    ) -> std::result::Result<(), BackendError> {
        let mut ledger = self.ledger.lock().await;
        let Some(reservation) = ledger.reservations.get(remote_id) else {
            return Err(BackendError::transient(404, format!("unknown upload {remote_id}")));
        };

        let receipt = Receipt {
            remote_id: remote_id.to_string(),
            file_name: reservation.file_name.clone(),
            bytes: request.bytes,
            success: request.success,
            error: request.error,
            confirmed_at: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&receipt)
            .map_err(|e| BackendError::transient(500, e.to_string()))?;
        fs::write(self.root.join(remote_id).join(RECEIPT_FILE), json)
            .await
            .map_err(|e| BackendError::transient(500, e.to_string()))?;

        ledger.receipts.insert(remote_id.to_string(), receipt);
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalDirectoryBackend {
    async fn transmit(
        &self,
        destination: &Destination,
        payload: &Payload,
        on_progress: ProgressFn<'_>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(path) = destination.transmit_target.strip_prefix("file://") else {
            return Err(TransferError::TransportError(format!(
                "unsupported target {}",
                destination.transmit_target
            )));
        };

        self.write_chunks(Path::new(path), destination.method, payload, on_progress, &cancel)
            .await
            .map_err(|e| match e {
                TransferError::CanceledError | TransferError::TransportError(_) => e,
                other => TransferError::TransportError(other.to_string()),
            })
    }
}

fn validate_reserve(request: &ReserveRequest) -> std::result::Result<(), BackendError> {
    let name = request.file_name.trim();
    if name.is_empty() {
        return Err(BackendError::validation("filename is required"));
    }
    // The name becomes a path component, nothing more.
    if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
        return Err(BackendError::validation(format!("invalid filename '{name}'")));
    }
    if request.size == 0 {
        return Err(BackendError::validation("size must be greater than zero"));
    }
    Ok(())
}

fn remote_id() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LENGTH)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("upload_{}_{}", Utc::now().timestamp_millis(), suffix)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "partial file not removed");
    }
}
