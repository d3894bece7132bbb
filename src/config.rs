//! Runtime configuration for the orchestrator, the local backend and logging.

use crate::domain::record::UploadMethod;
use std::path::PathBuf;

/// Default chunk size used by the local transport: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Upper bound on simultaneous transmits. `None` means unbounded.
    ///
    /// Reservations are never capped.
    pub max_concurrent_uploads: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LocalBackendConfig {
    /// Directory under which every reservation gets its own folder.
    pub root: PathBuf,
    pub chunk_size: usize,
    pub method: UploadMethod,
}

impl LocalBackendConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            method: UploadMethod::Put,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
