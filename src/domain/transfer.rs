//! Per-transfer state machine.
//!
//! ```text
//! idle → queued → reserving → ready → uploading → success
//!                     ↓                   ↓
//!                   error ←───────────────┘
//!         (any active) → canceled      error/canceled → retrying
//! ```
//!
//! Events that are not valid for the current state leave the state untouched
//! but still apply their context payload, and listeners are notified on every
//! `send`.

use super::record::Destination;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Idle,
    Queued,
    Reserving,
    Ready,
    Uploading,
    Success,
    Error,
    Canceled,
    Retrying,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Queued => "queued",
            TransferState::Reserving => "reserving",
            TransferState::Ready => "ready",
            TransferState::Uploading => "uploading",
            TransferState::Success => "success",
            TransferState::Error => "error",
            TransferState::Canceled => "canceled",
            TransferState::Retrying => "retrying",
        }
    }

    /// States with an operation in flight.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, TransferState::Reserving | TransferState::Uploading)
    }

    /// States where the last attempt has settled.
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransferState::Success | TransferState::Error | TransferState::Canceled
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    AddFile,
    StartReserve,
    ReserveSuccess(Destination),
    ReserveError(String),
    StartUpload,
    UploadProgress(u8),
    UploadSuccess,
    UploadError(String),
    Cancel,
    Retry,
    Remove,
}

impl TransferEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransferEvent::AddFile => "ADD_FILE",
            TransferEvent::StartReserve => "START_RESERVE",
            TransferEvent::ReserveSuccess(_) => "RESERVE_SUCCESS",
            TransferEvent::ReserveError(_) => "RESERVE_ERROR",
            TransferEvent::StartUpload => "START_UPLOAD",
            TransferEvent::UploadProgress(_) => "UPLOAD_PROGRESS",
            TransferEvent::UploadSuccess => "UPLOAD_SUCCESS",
            TransferEvent::UploadError(_) => "UPLOAD_ERROR",
            TransferEvent::Cancel => "CANCEL",
            TransferEvent::Retry => "RETRY",
            TransferEvent::Remove => "REMOVE",
        }
    }
}

/// Transition table. `None` means the event is not valid in `state`.
pub fn next_state(state: TransferState, event: &TransferEvent) -> Option<TransferState> {
    use TransferEvent as E;
    use TransferState as S;

    match (state, event) {
        (S::Idle, E::AddFile) => Some(S::Queued),

        (S::Queued, E::StartReserve) => Some(S::Reserving),
        (S::Queued, E::Cancel) => Some(S::Canceled),
        (S::Queued, E::Remove) => Some(S::Idle),

        (S::Reserving, E::ReserveSuccess(_)) => Some(S::Ready),
        (S::Reserving, E::ReserveError(_)) => Some(S::Error),
        (S::Reserving, E::Cancel) => Some(S::Canceled),
        (S::Reserving, E::Remove) => Some(S::Idle),

        (S::Ready, E::StartUpload) => Some(S::Uploading),
        (S::Ready, E::Cancel) => Some(S::Canceled),
        (S::Ready, E::Remove) => Some(S::Idle),

        (S::Uploading, E::UploadProgress(_)) => Some(S::Uploading),
        (S::Uploading, E::UploadSuccess) => Some(S::Success),
        (S::Uploading, E::UploadError(_)) => Some(S::Error),
        (S::Uploading, E::Cancel) => Some(S::Canceled),

        (S::Success, E::Remove) => Some(S::Idle),

        (S::Error | S::Canceled, E::Retry) => Some(S::Retrying),
        (S::Error | S::Canceled, E::Remove) => Some(S::Idle),

        (S::Retrying, E::StartReserve) => Some(S::Reserving),
        (S::Retrying, E::ReserveSuccess(_)) => Some(S::Ready),
        (S::Retrying, E::StartUpload) => Some(S::Uploading),
        (S::Retrying, E::UploadSuccess) => Some(S::Success),
        (S::Retrying, E::UploadError(_)) => Some(S::Error),
        (S::Retrying, E::Cancel) => Some(S::Canceled),
        (S::Retrying, E::Remove) => Some(S::Idle),

        _ => None,
    }
}

/// Mutable data carried alongside the state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferContext {
    pub progress: u8,
    pub error: Option<String>,
    pub destination: Option<Destination>,
}

impl TransferContext {
    /// Merges the payload carried by `event`. Independent of the transition.
    fn apply(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::ReserveSuccess(destination) => {
                self.destination = Some(destination.clone());
                self.error = None;
            }
            TransferEvent::ReserveError(message) | TransferEvent::UploadError(message) => {
                self.error = Some(message.clone());
            }
            TransferEvent::UploadProgress(progress) => {
                self.progress = (*progress).min(100);
            }
            TransferEvent::UploadSuccess => {
                self.progress = 100;
                self.error = None;
            }
            TransferEvent::Retry => {
                self.progress = 0;
                self.error = None;
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Transitioned {
        from: TransferState,
        to: TransferState,
    },
    /// The event was not valid; state kept, context still merged.
    NoOp(TransferState),
}

impl SendOutcome {
    pub fn state(&self) -> TransferState {
        match self {
            SendOutcome::Transitioned { to, .. } => *to,
            SendOutcome::NoOp(state) => *state,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, SendOutcome::NoOp(_))
    }
}

pub type TransferListener = Box<dyn Fn(TransferState, &TransferContext) + Send + Sync>;

/// Stateful instance wrapping one transfer's state and context.
pub struct TransferMachine {
    state: TransferState,
    context: TransferContext,
    listeners: Vec<TransferListener>,
}

impl Default for TransferMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransferMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferMachine")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl TransferMachine {
    pub fn new() -> Self {
        Self {
            state: TransferState::Idle,
            context: TransferContext::default(),
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn context(&self) -> &TransferContext {
        &self.context
    }

    pub fn subscribe(&mut self, listener: TransferListener) {
        self.listeners.push(listener);
    }

    pub fn send(&mut self, event: TransferEvent) -> SendOutcome {
        self.context.apply(&event);

        let outcome = match next_state(self.state, &event) {
            Some(to) => {
                let from = self.state;
                self.state = to;
                debug!(event = event.name(), %from, %to, "transfer transition");
                SendOutcome::Transitioned { from, to }
            }
            None => {
                warn!(
                    event = event.name(),
                    state = %self.state,
                    "event ignored in current state"
                );
                SendOutcome::NoOp(self.state)
            }
        };

        for listener in &self.listeners {
            listener(self.state, &self.context);
        }
        outcome
    }

    /// State and context that `events` would produce. Nothing is applied and
    /// no listener runs.
    pub fn preview<'a>(
        &self,
        events: impl IntoIterator<Item = &'a TransferEvent>,
    ) -> (TransferState, TransferContext) {
        let mut state = self.state;
        let mut context = self.context.clone();
        for event in events {
            context.apply(event);
            if let Some(next) = next_state(state, event) {
                state = next;
            }
        }
        (state, context)
    }

    /// Sends every event in order, returning the last outcome.
    pub fn send_all(&mut self, events: impl IntoIterator<Item = TransferEvent>) -> SendOutcome {
        let mut outcome = SendOutcome::NoOp(self.state);
        for event in events {
            outcome = self.send(event);
        }
        outcome
    }
}
