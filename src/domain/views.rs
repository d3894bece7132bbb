//! Pure computations over a registry snapshot.

use super::record::TransferRecord;
use super::session::{SessionContext, SessionState};
use super::transfer::TransferState;
use serde::Serialize;
use std::fmt;

/// Credit a transfer contributes towards overall progress.
///
/// A failed transfer contributes nothing, whatever progress it had reached.
pub fn contribution(record: &TransferRecord) -> u32 {
    match record.state {
        TransferState::Success => 100,
        TransferState::Uploading => u32::from(record.progress),
        _ => 0,
    }
}

pub fn overall_progress(records: &[TransferRecord]) -> u8 {
    if records.is_empty() {
        return 0;
    }
    let sum: u32 = records.iter().map(contribution).sum();
    (f64::from(sum) / records.len() as f64).round() as u8
}

pub fn session_context(records: &[TransferRecord]) -> SessionContext {
    let mut ctx = SessionContext {
        total_files: records.len(),
        overall_progress: overall_progress(records),
        ..Default::default()
    };
    for record in records {
        match record.state {
            TransferState::Queued | TransferState::Reserving => ctx.preparing_files += 1,
            TransferState::Ready => ctx.ready_files += 1,
            TransferState::Uploading | TransferState::Retrying => ctx.uploading_files += 1,
            TransferState::Success => ctx.completed_files += 1,
            TransferState::Error => ctx.failed_files += 1,
            TransferState::Canceled => ctx.canceled_files += 1,
            TransferState::Idle => {}
        }
        if record.is_placeholder() {
            ctx.has_placeholder_files = true;
        } else if record.state == TransferState::Error {
            ctx.has_retryable_files = true;
        }
    }
    ctx
}

/// The intake freeze: once anything is in flight or has succeeded, the batch
/// is closed until it is cleared.
pub fn is_session_started(records: &[TransferRecord]) -> bool {
    records.iter().any(|r| {
        matches!(
            r.state,
            TransferState::Reserving | TransferState::Uploading | TransferState::Success
        )
    })
}

/// Records the transmit phase may pick up: reserved, ready and backed by a
/// real payload.
pub fn is_eligible_for_transmit(record: &TransferRecord) -> bool {
    record.state == TransferState::Ready
        && record.destination.is_some()
        && !record.id.as_str().is_empty()
        && record.payload_size > 0
}

pub fn can_start(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Ready | SessionState::Partial | SessionState::Failed
    )
}

pub fn can_add_files(state: SessionState) -> bool {
    matches!(
        state,
        SessionState::Idle
            | SessionState::Completed
            | SessionState::Partial
            | SessionState::Failed
            | SessionState::Canceled
    )
}

pub fn can_cancel(ctx: &SessionContext) -> bool {
    ctx.uploading_files > 0 || ctx.preparing_files > 0
}

pub fn can_retry_failed(ctx: &SessionContext) -> bool {
    ctx.has_retryable_files
}

pub fn can_clear(ctx: &SessionContext) -> bool {
    ctx.total_files > ctx.uploading_files
}

/// Aggregate view handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub state: SessionState,
    #[serde(flatten)]
    pub counts: SessionContext,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

impl SessionSummary {
    pub fn new(state: SessionState, records: &[TransferRecord]) -> Self {
        let total_bytes = records.iter().map(|r| r.file.size).sum();
        let transferred_bytes = records
            .iter()
            .map(|r| r.file.size * u64::from(contribution(r)) / 100)
            .sum();
        Self {
            state,
            counts: session_context(records),
            total_bytes,
            transferred_bytes,
        }
    }

    pub fn overall_progress(&self) -> u8 {
        self.counts.overall_progress
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        write!(
            f,
            "{}: {} file(s), {} completed, {} failed, {} canceled, {}% ({} of {})",
            self.state,
            c.total_files,
            c.completed_files,
            c.failed_files,
            c.canceled_files,
            c.overall_progress,
            format_bytes(self.transferred_bytes),
            format_bytes(self.total_bytes),
        )
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
