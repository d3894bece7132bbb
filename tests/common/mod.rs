#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use transfer_conductor::application::orchestrator::Orchestrator;
use transfer_conductor::application::payloads::PayloadCache;
use transfer_conductor::application::registry::TransferRegistry;
use transfer_conductor::config::OrchestratorConfig;
use transfer_conductor::domain::ports::{
    ConfirmRequest, ProgressFn, ProjectionStore, ReserveRequest, Transport, UploadBackend,
};
use transfer_conductor::domain::record::{
    Destination, Payload, PersistedTransfer, TransferId, UploadMethod,
};
use transfer_conductor::domain::transfer::TransferState;
use transfer_conductor::error::{BackendError, Result, TransferError};
use transfer_conductor::infrastructure::in_memory::InMemoryProjectionStore;

pub fn payload(name: &str, size: usize) -> Payload {
    Payload::new(
        name,
        "application/octet-stream",
        1_700_000_000_000,
        vec![0xAB; size],
    )
}

/// Backend whose answers are decided by file name.
pub struct ScriptedBackend {
    failing: HashSet<String>,
    held: HashSet<String>,
    gate: Semaphore,
    reserves: AtomicUsize,
    confirms: Mutex<Vec<(String, ConfirmRequest)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            held: HashSet::new(),
            gate: Semaphore::new(0),
            reserves: AtomicUsize::new(0),
            confirms: Mutex::new(Vec::new()),
        }
    }

    /// Reservations for `name` fail with a 503.
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Reservations for `name` wait until [`release`](Self::release) is called.
    pub fn holding(mut self, name: &str) -> Self {
        self.held.insert(name.to_string());
        self
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn reserve_calls(&self) -> usize {
        self.reserves.load(Ordering::SeqCst)
    }

    pub fn confirms(&self) -> Vec<(String, ConfirmRequest)> {
        self.confirms.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadBackend for ScriptedBackend {
    async fn reserve(
        &self,
        request: ReserveRequest,
    ) -> std::result::Result<Destination, BackendError> {
        let n = self.reserves.fetch_add(1, Ordering::SeqCst);
        if self.held.contains(&request.file_name) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        if self.failing.contains(&request.file_name) {
            return Err(BackendError::transient(503, "Service unavailable"));
        }
        Ok(Destination {
            remote_id: format!("upload_{n}_test"),
            transmit_target: format!("mem://uploads/{}", request.file_name),
            method: UploadMethod::Put,
        })
    }

    async fn confirm(
        &self,
        remote_id: &str,
        request: ConfirmRequest,
    ) -> std::result::Result<(), BackendError> {
        self.confirms
            .lock()
            .unwrap()
            .push((remote_id.to_string(), request));
        Ok(())
    }
}

/// Transport that can hold uploads until released and fail chosen files.
pub struct GatedTransport {
    held: HashSet<String>,
    fail_once: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    gate: Semaphore,
    started: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            held: HashSet::new(),
            fail_once: Mutex::new(HashSet::new()),
            delay: None,
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Uploads of `name` stop at 50% until released or canceled.
    pub fn holding(mut self, name: &str) -> Self {
        self.held.insert(name.to_string());
        self
    }

    /// The first upload of `name` fails with a transport error.
    pub fn failing_once(self, name: &str) -> Self {
        self.fail_once.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn run(
        &self,
        payload: &Payload,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total = payload.len();
        on_progress(total / 2, total);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::CanceledError),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.held.contains(&payload.meta.name) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::CanceledError),
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }

        if self.fail_once.lock().unwrap().remove(&payload.meta.name) {
            return Err(TransferError::TransportError("connection reset".into()));
        }
        on_progress(total, total);
        Ok(())
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn transmit(
        &self,
        _destination: &Destination,
        payload: &Payload,
        on_progress: ProgressFn<'_>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.run(payload, on_progress, &cancel).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Switches that make [`FaultyStore`] writes fail.
pub struct StoreFaults {
    puts_left: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl StoreFaults {
    pub fn new() -> Self {
        Self {
            puts_left: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self) {
        self.fail_puts_after(0);
    }

    /// Lets `n` more puts through, then fails every one after.
    pub fn fail_puts_after(&self, n: usize) {
        self.puts_left.store(n, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.puts_left.store(usize::MAX, Ordering::SeqCst);
        self.fail_deletes.store(false, Ordering::SeqCst);
    }
}

fn disk_full() -> TransferError {
    TransferError::StorageError(Box::new(std::io::Error::other("disk full")))
}

/// In-memory store whose writes can be made to fail.
pub struct FaultyStore {
    inner: InMemoryProjectionStore,
    faults: Arc<StoreFaults>,
}

#[async_trait]
impl ProjectionStore for FaultyStore {
    async fn put(&self, projection: PersistedTransfer) -> Result<()> {
        let allowed = self
            .faults
            .puts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(disk_full());
        }
        self.inner.put(projection).await
    }

    async fn get(&self, id: &TransferId) -> Result<Option<PersistedTransfer>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &TransferId) -> Result<()> {
        if self.faults.fail_deletes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.delete(id).await
    }

    async fn all(&self) -> Result<Vec<PersistedTransfer>> {
        self.inner.all().await
    }

    async fn clear(&self) -> Result<()> {
        if self.faults.fail_deletes.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.clear().await
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<TransferRegistry>,
    pub backend: Arc<ScriptedBackend>,
    pub transport: Arc<GatedTransport>,
    pub store: InMemoryProjectionStore,
    pub faults: Arc<StoreFaults>,
    pub payloads: PayloadCache,
}

impl Harness {
    pub fn new(backend: ScriptedBackend, transport: GatedTransport) -> Self {
        Self::with_config(backend, transport, OrchestratorConfig::default())
    }

    pub fn with_config(
        backend: ScriptedBackend,
        transport: GatedTransport,
        config: OrchestratorConfig,
    ) -> Self {
        Self::over(
            InMemoryProjectionStore::new(),
            PayloadCache::new(),
            Arc::new(backend),
            Arc::new(transport),
            config,
        )
    }

    /// A second harness over the same store, cache and collaborators, as a
    /// process restart would see them.
    pub fn restart(&self, payloads: PayloadCache) -> Self {
        Self::over(
            self.store.clone(),
            payloads,
            self.backend.clone(),
            self.transport.clone(),
            OrchestratorConfig::default(),
        )
    }

    fn over(
        store: InMemoryProjectionStore,
        payloads: PayloadCache,
        backend: Arc<ScriptedBackend>,
        transport: Arc<GatedTransport>,
        config: OrchestratorConfig,
    ) -> Self {
        let faults = Arc::new(StoreFaults::new());
        let registry = Arc::new(TransferRegistry::new(
            Box::new(FaultyStore {
                inner: store.clone(),
                faults: faults.clone(),
            }),
            payloads.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            backend.clone(),
            transport.clone(),
            config,
        ));
        Self {
            orchestrator,
            registry,
            backend,
            transport,
            store,
            faults,
            payloads,
        }
    }

    pub async fn state_of(&self, id: &TransferId) -> Option<TransferState> {
        self.registry.get(id).await.map(|r| r.state)
    }

    /// Polls until `id` reaches `state`, panicking after a few seconds.
    pub async fn wait_for(&self, id: &TransferId, state: TransferState) {
        for _ in 0..1000 {
            if self.state_of(id).await == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "transfer {id} never reached {state}, last seen {:?}",
            self.state_of(id).await
        );
    }
}
