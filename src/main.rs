use clap::{Parser, ValueEnum};
use futures::future::join_all;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use transfer_conductor::application::orchestrator::Orchestrator;
use transfer_conductor::application::payloads::PayloadCache;
use transfer_conductor::application::registry::TransferRegistry;
use transfer_conductor::config::{
    DEFAULT_CHUNK_SIZE, LocalBackendConfig, LogConfig, OrchestratorConfig,
};
use transfer_conductor::domain::ports::ProjectionStoreBox;
use transfer_conductor::domain::record::{Payload, UploadMethod};
use transfer_conductor::domain::views;
use transfer_conductor::infrastructure::in_memory::InMemoryProjectionStore;
use transfer_conductor::infrastructure::local::LocalDirectoryBackend;
use transfer_conductor::interfaces::csv::manifest_reader::{ManifestEntry, ManifestReader};
use transfer_conductor::interfaces::csv::transfer_writer::TransferWriter;
use transfer_conductor::logging::init_logging;

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Put,
    Post,
}

impl From<MethodArg> for UploadMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Put => UploadMethod::Put,
            MethodArg::Post => UploadMethod::Post,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Files to upload
    files: Vec<PathBuf>,

    /// CSV manifest with `path[,type]` rows
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Directory uploads are written to
    #[arg(long, default_value = "uploads")]
    dest: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Maximum number of simultaneous uploads
    #[arg(long)]
    max_concurrent_uploads: Option<usize>,

    /// Bytes written per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, value_enum, default_value = "put")]
    method: MethodArg,

    /// Retry every failed transfer left from a previous run
    #[arg(long)]
    retry_failed: bool,

    /// Drop all stored transfers before doing anything else
    #[arg(long)]
    clear: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn open_store(db_path: Option<PathBuf>) -> Result<ProjectionStoreBox> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = db_path {
        use transfer_conductor::infrastructure::rocksdb::RocksDBProjectionStore;
        let store = RocksDBProjectionStore::open(db_path).into_diagnostic()?;
        return Ok(Box::new(store));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Box::new(InMemoryProjectionStore::new()))
}

async fn load_payloads(cli: &Cli) -> Result<Vec<Payload>> {
    let mut entries: Vec<ManifestEntry> = cli
        .files
        .iter()
        .map(|path| ManifestEntry {
            path: path.clone(),
            mime_type: None,
        })
        .collect();

    if let Some(manifest) = &cli.manifest {
        let file = File::open(manifest).into_diagnostic()?;
        for entry in ManifestReader::new(file).entries() {
            entries.push(entry.into_diagnostic()?);
        }
    }

    let mut payloads = Vec::with_capacity(entries.len());
    for entry in &entries {
        payloads.push(entry.load().await.into_diagnostic()?);
    }
    Ok(payloads)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
    });

    let store = open_store(cli.db_path.clone())?;
    let registry = Arc::new(TransferRegistry::new(store, PayloadCache::new()));
    registry.rehydrate().await.into_diagnostic()?;

    let local = Arc::new(LocalDirectoryBackend::new(LocalBackendConfig {
        root: cli.dest.clone(),
        chunk_size: cli.chunk_size,
        method: cli.method.into(),
    }));
    let orchestrator = Orchestrator::new(
        registry.clone(),
        local.clone(),
        local,
        OrchestratorConfig {
            max_concurrent_uploads: cli.max_concurrent_uploads,
        },
    );

    if cli.clear {
        orchestrator.clear_all().await.into_diagnostic()?;
    }

    // Files matching a transfer whose data was lost are restored in place.
    let mut placeholders: HashMap<String, _> = orchestrator
        .list_transfers()
        .await
        .into_iter()
        .filter(|r| r.is_placeholder())
        .map(|r| (r.file.name.clone(), r.id))
        .collect();
    let mut fresh = Vec::new();
    let mut restored = Vec::new();
    for payload in load_payloads(&cli).await? {
        match placeholders.remove(&payload.meta.name) {
            Some(id) => {
                registry
                    .restore_payload(&id, payload)
                    .await
                    .into_diagnostic()?;
                restored.push(id);
            }
            None => fresh.push(payload),
        }
    }
    join_all(restored.iter().map(|id| orchestrator.retry(id))).await;

    if !fresh.is_empty() {
        orchestrator.prepare_all(fresh).await.into_diagnostic()?;
    }
    orchestrator.prepare_queued().await;
    if cli.retry_failed {
        orchestrator.retry_all_failed().await;
    }
    orchestrator.start_all().await;

    let transfers = orchestrator.list_transfers().await;
    let stdout = io::stdout();
    let mut writer = TransferWriter::new(stdout.lock());
    writer.write_transfers(&transfers).into_diagnostic()?;

    let summary = orchestrator.session_summary().await;
    eprintln!("{summary}");
    if views::can_retry_failed(&summary.counts) && cli.db_path.is_some() {
        eprintln!("Failed transfers are kept; run again with --retry-failed to retry them.");
    }
    Ok(())
}
