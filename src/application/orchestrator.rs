//! Drives transfers through reserve, transmit and confirm.
//!
//! Per-record failures are recorded on the record and reported as a
//! [`TransferOutcome`]; batch calls settle every member before returning and
//! never fail as a whole.

use super::registry::{TransferRegistry, TransferUpdate};
use crate::config::OrchestratorConfig;
use crate::domain::ports::{ConfirmRequest, ReserveRequest, Transport, UploadBackend};
use crate::domain::record::{Destination, Payload, TransferId, TransferRecord};
use crate::domain::transfer::{TransferEvent, TransferState};
use crate::domain::views::{self, SessionSummary};
use crate::error::{PLACEHOLDER_RETRY_MESSAGE, Result, TransferError};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of the best-effort confirm notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmStatus {
    Acknowledged,
    NotSent,
    /// Logged and otherwise ignored; the transfer keeps its outcome.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotEligible(TransferState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Reserved,
    Uploaded { confirm: ConfirmStatus },
    Failed { message: String, confirm: ConfirmStatus },
    Canceled,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub id: TransferId,
    pub outcome: TransferOutcome,
}

impl TransferReport {
    fn new(id: &TransferId, outcome: TransferOutcome) -> Self {
        Self {
            id: id.clone(),
            outcome,
        }
    }

    fn skipped(id: &TransferId, reason: SkipReason) -> Self {
        Self::new(id, TransferOutcome::Skipped(reason))
    }

    fn failed(id: &TransferId, message: impl Into<String>, confirm: ConfirmStatus) -> Self {
        Self::new(
            id,
            TransferOutcome::Failed {
                message: message.into(),
                confirm,
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Failed { .. })
    }
}

pub struct Orchestrator {
    registry: Arc<TransferRegistry>,
    backend: Arc<dyn UploadBackend>,
    transport: Arc<dyn Transport>,
    upload_slots: Option<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<TransferRegistry>,
        backend: Arc<dyn UploadBackend>,
        transport: Arc<dyn Transport>,
        config: OrchestratorConfig,
    ) -> Self {
        let upload_slots = config
            .max_concurrent_uploads
            .filter(|n| *n > 0)
            .map(Semaphore::new);
        Self {
            registry,
            backend,
            transport,
            upload_slots,
        }
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Queues payloads without reserving them.
    pub async fn add_files(&self, payloads: Vec<Payload>) -> Result<Vec<TransferId>> {
        self.registry.add_transfers(payloads).await
    }

    /// Queues payloads and reserves a destination for each, concurrently.
    ///
    /// Fails only on malformed intake. A started session makes this a no-op.
    pub async fn prepare_all(&self, payloads: Vec<Payload>) -> Result<Vec<TransferReport>> {
        let ids = self.registry.add_transfers(payloads).await?;
        Ok(self.reserve_many(ids).await)
    }

    /// Reserves every record still `queued`.
    pub async fn prepare_queued(&self) -> Vec<TransferReport> {
        let ids = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|r| r.state == TransferState::Queued)
            .map(|r| r.id)
            .collect();
        self.reserve_many(ids).await
    }

    /// Transmits every eligible record, concurrently up to the upload cap.
    pub async fn start_all(&self) -> Vec<TransferReport> {
        let eligible: Vec<TransferId> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(views::is_eligible_for_transmit)
            .map(|r| r.id)
            .collect();

        let reports = join_all(eligible.iter().map(|id| self.transmit_one(id))).await;
        log_phase("transmit", &reports);
        reports
    }

    /// Retries one `error` or `canceled` record.
    ///
    /// A placeholder goes straight back to `error` without contacting the
    /// backend. A record that never got a destination reserves first.
    pub async fn retry(&self, id: &TransferId) -> TransferReport {
        let Some(record) = self.registry.get(id).await else {
            return TransferReport::skipped(id, SkipReason::NotFound);
        };

        if record.is_placeholder() {
            let update = TransferUpdate::events([
                TransferEvent::Retry,
                TransferEvent::UploadError(PLACEHOLDER_RETRY_MESSAGE.to_string()),
            ])
            .only_from(&[TransferState::Error]);
            if let Err(e) = self.registry.update(id, update).await {
                return storage_failure(id, e);
            }
            warn!(transfer = %id, "retry refused, file data missing");
            return TransferReport::failed(
                id,
                TransferError::PlaceholderRetryError.to_string(),
                ConfirmStatus::NotSent,
            );
        }

        let retryable = [TransferState::Error, TransferState::Canceled];
        if !retryable.contains(&record.state) {
            return TransferReport::skipped(id, SkipReason::NotEligible(record.state));
        }

        debug!(transfer = %id, from = %record.state, "retrying transfer");
        match record.destination {
            Some(destination) => {
                let update = TransferUpdate::events([
                    TransferEvent::Retry,
                    TransferEvent::ReserveSuccess(destination),
                ])
                .clear_token()
                .only_from(&retryable);
                match self.registry.update(id, update).await {
                    Ok(Some(r)) if r.state == TransferState::Ready => self.transmit_one(id).await,
                    Ok(Some(r)) => TransferReport::skipped(id, SkipReason::NotEligible(r.state)),
                    Ok(None) => TransferReport::skipped(id, SkipReason::NotFound),
                    Err(e) => storage_failure(id, e),
                }
            }
            None => {
                let update = TransferUpdate::event(TransferEvent::Retry)
                    .clear_token()
                    .only_from(&retryable);
                if let Err(e) = self.registry.update(id, update).await {
                    return storage_failure(id, e);
                }
                let report = self.reserve_one(id).await;
                if report.outcome != TransferOutcome::Reserved {
                    return report;
                }
                self.transmit_one(id).await
            }
        }
    }

    /// Retries every retryable `error` record; placeholders are left alone.
    pub async fn retry_all_failed(&self) -> Vec<TransferReport> {
        let ids: Vec<TransferId> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(TransferRecord::is_retryable)
            .map(|r| r.id)
            .collect();

        let reports = join_all(ids.iter().map(|id| self.retry(id))).await;
        log_phase("retry", &reports);
        reports
    }

    pub async fn cancel(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        self.registry.cancel(id).await
    }

    pub async fn cancel_all(&self) -> Result<Vec<TransferId>> {
        self.registry.cancel_all().await
    }

    pub async fn remove(&self, id: &TransferId) -> Result<bool> {
        self.registry.remove(id).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.registry.clear_all().await
    }

    pub async fn clear_removable(&self) -> Result<Vec<TransferId>> {
        self.registry.clear_removable().await
    }

    pub async fn list_transfers(&self) -> Vec<TransferRecord> {
        self.registry.list().await
    }

    pub async fn session_summary(&self) -> SessionSummary {
        self.registry.session_summary().await
    }

    async fn reserve_many(&self, ids: Vec<TransferId>) -> Vec<TransferReport> {
        let reports = join_all(ids.iter().map(|id| self.reserve_one(id))).await;
        log_phase("reserve", &reports);
        reports
    }

    async fn reserve_one(&self, id: &TransferId) -> TransferReport {
        let token = CancellationToken::new();
        let start = TransferUpdate::event(TransferEvent::StartReserve)
            .with_token(token.clone())
            .only_from(&[TransferState::Queued, TransferState::Retrying]);
        let record = match self.registry.update(id, start).await {
            Ok(Some(r)) if r.state == TransferState::Reserving => r,
            Ok(Some(r)) => return TransferReport::skipped(id, SkipReason::NotEligible(r.state)),
            Ok(None) => return TransferReport::skipped(id, SkipReason::NotFound),
            Err(e) => return storage_failure(id, e),
        };

        let request = ReserveRequest::from(&record.file);
        let result = tokio::select! {
            _ = token.cancelled() => return TransferReport::new(id, TransferOutcome::Canceled),
            result = self.backend.reserve(request) => result,
        };
        if token.is_cancelled() {
            debug!(transfer = %id, "late reservation discarded");
            return TransferReport::new(id, TransferOutcome::Canceled);
        }

        let (event, message) = match result {
            Ok(destination) => (TransferEvent::ReserveSuccess(destination), None),
            Err(e) => {
                let message = TransferError::from(e).to_string();
                (TransferEvent::ReserveError(message.clone()), Some(message))
            }
        };
        let finish = TransferUpdate::event(event)
            .clear_token()
            .only_from(&[TransferState::Reserving]);
        match self.registry.update(id, finish).await {
            Ok(Some(r)) => match (r.state, message) {
                (TransferState::Ready, _) => TransferReport::new(id, TransferOutcome::Reserved),
                (TransferState::Error, Some(message)) => {
                    warn!(transfer = %id, error = %message, "reservation failed");
                    TransferReport::failed(id, message, ConfirmStatus::NotSent)
                }
                (state, _) => TransferReport::skipped(id, SkipReason::NotEligible(state)),
            },
            Ok(None) => TransferReport::skipped(id, SkipReason::NotFound),
            Err(e) => storage_failure(id, e),
        }
    }

    async fn transmit_one(&self, id: &TransferId) -> TransferReport {
        // Waiting for a slot leaves the record `ready`.
        let _permit = match &self.upload_slots {
            Some(slots) => slots.acquire().await.ok(),
            None => None,
        };

        let token = CancellationToken::new();
        let start = TransferUpdate::event(TransferEvent::StartUpload)
            .with_token(token.clone())
            .only_from(&[TransferState::Ready]);
        let record = match self.registry.update(id, start).await {
            Ok(Some(r)) if r.state == TransferState::Uploading => r,
            Ok(Some(r)) => return TransferReport::skipped(id, SkipReason::NotEligible(r.state)),
            Ok(None) => return TransferReport::skipped(id, SkipReason::NotFound),
            Err(e) => return storage_failure(id, e),
        };

        let payload = self.registry.payload(id).await;
        let (Some(destination), Some(payload)) = (record.destination.clone(), payload) else {
            let message = "file data unavailable".to_string();
            return self.finish_failed(id, None, message).await;
        };

        let result = self.run_transmit(id, &destination, &payload, &token).await;
        match result {
            Ok(()) if !token.is_cancelled() => {
                let confirm = self
                    .confirm(id, &destination, ConfirmRequest::succeeded(record.file.size))
                    .await;
                let finish = TransferUpdate::event(TransferEvent::UploadSuccess)
                    .clear_token()
                    .only_from(&[TransferState::Uploading]);
                match self.registry.update(id, finish).await {
                    Ok(Some(r)) if r.state == TransferState::Success => {
                        debug!(transfer = %id, "upload complete");
                        TransferReport::new(id, TransferOutcome::Uploaded { confirm })
                    }
                    Ok(Some(_)) => TransferReport::new(id, TransferOutcome::Canceled),
                    Ok(None) => TransferReport::skipped(id, SkipReason::NotFound),
                    Err(e) => storage_failure(id, e),
                }
            }
            Ok(()) | Err(TransferError::CanceledError) => {
                let finish = TransferUpdate::event(TransferEvent::Cancel)
                    .clear_token()
                    .only_from(&[TransferState::Uploading]);
                if let Err(e) = self.registry.update(id, finish).await {
                    return storage_failure(id, e);
                }
                info!(transfer = %id, "upload canceled");
                TransferReport::new(id, TransferOutcome::Canceled)
            }
            Err(e) => self.finish_failed(id, Some(&destination), e.to_string()).await,
        }
    }

    /// Runs the transport, forwarding progress into the registry as it
    /// arrives.
    async fn run_transmit(
        &self,
        id: &TransferId,
        destination: &Destination,
        payload: &Payload,
        token: &CancellationToken,
    ) -> Result<()> {
        let (progress_tx, mut progress_rx) = watch::channel(0u8);
        let on_progress = move |loaded: u64, total: u64| {
            let percent = percent(loaded, total);
            progress_tx.send_if_modified(|current| {
                if *current == percent {
                    return false;
                }
                *current = percent;
                true
            });
        };

        let transmit = self
            .transport
            .transmit(destination, payload, &on_progress, token.clone());
        tokio::pin!(transmit);

        loop {
            tokio::select! {
                result = &mut transmit => return result,
                Ok(()) = progress_rx.changed() => {
                    let percent = *progress_rx.borrow_and_update();
                    let update = TransferUpdate::event(TransferEvent::UploadProgress(percent))
                        .only_from(&[TransferState::Uploading]);
                    if let Err(e) = self.registry.update(id, update).await {
                        error!(transfer = %id, error = %e, "failed to record progress");
                    }
                }
            }
        }
    }

    async fn finish_failed(
        &self,
        id: &TransferId,
        destination: Option<&Destination>,
        message: String,
    ) -> TransferReport {
        let confirm = match destination {
            Some(destination) => {
                self.confirm(id, destination, ConfirmRequest::failed(message.clone()))
                    .await
            }
            None => ConfirmStatus::NotSent,
        };
        let finish = TransferUpdate::event(TransferEvent::UploadError(message.clone()))
            .clear_token()
            .only_from(&[TransferState::Uploading]);
        if let Err(e) = self.registry.update(id, finish).await {
            return storage_failure(id, e);
        }
        warn!(transfer = %id, error = %message, "upload failed");
        TransferReport::failed(id, message, confirm)
    }

    async fn confirm(
        &self,
        id: &TransferId,
        destination: &Destination,
        request: ConfirmRequest,
    ) -> ConfirmStatus {
        match self.backend.confirm(&destination.remote_id, request).await {
            Ok(()) => ConfirmStatus::Acknowledged,
            Err(e) => {
                let err = TransferError::ConfirmNotifyError(e.to_string());
                warn!(transfer = %id, error = %err, "confirm notification ignored");
                ConfirmStatus::Failed(e.to_string())
            }
        }
    }
}

fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (loaded.min(total) * 100 / total) as u8
}

fn storage_failure(id: &TransferId, err: TransferError) -> TransferReport {
    error!(transfer = %id, error = %err, "failed to persist transfer");
    TransferReport::failed(id, err.to_string(), ConfirmStatus::NotSent)
}

fn log_phase(phase: &str, reports: &[TransferReport]) {
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    let canceled = reports
        .iter()
        .filter(|r| r.outcome == TransferOutcome::Canceled)
        .count();
    info!(
        phase,
        total = reports.len(),
        failed,
        canceled,
        "phase settled"
    );
}
