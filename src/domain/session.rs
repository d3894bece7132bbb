//! Aggregate session state machine.
//!
//! The session owns no counts. Each observation hands it a [`SessionContext`]
//! built from a registry snapshot; the machine derives the applicable event by
//! fixed precedence and applies it until the state settles.

use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Preparing,
    Ready,
    Uploading,
    Completed,
    Partial,
    Failed,
    Canceled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Ready => "ready",
            SessionState::Uploading => "uploading",
            SessionState::Completed => "completed",
            SessionState::Partial => "partial",
            SessionState::Failed => "failed",
            SessionState::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    FilesAdded,
    PreparationStarted,
    PreparationCompleted,
    UploadStarted,
    UploadProgress,
    AllCompleted,
    SomeFailed,
    AllFailed,
    AllCanceled,
    Reset,
}

/// Snapshot of transfer counts the session derives its state from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub canceled_files: usize,
    pub uploading_files: usize,
    pub preparing_files: usize,
    pub ready_files: usize,
    pub overall_progress: u8,
    pub has_retryable_files: bool,
    pub has_placeholder_files: bool,
}

/// Transition table. `None` means the event is not valid in `state`.
pub fn next_state(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let outcome = match event {
        E::AllCompleted => Some(S::Completed),
        E::SomeFailed => Some(S::Partial),
        E::AllFailed => Some(S::Failed),
        E::AllCanceled => Some(S::Canceled),
        E::Reset => Some(S::Idle),
        _ => None,
    };

    match (state, event) {
        (S::Idle, E::FilesAdded) => Some(S::Preparing),
        (S::Idle, _) => None,

        (S::Preparing, E::PreparationCompleted) => Some(S::Ready),
        (S::Preparing, E::UploadStarted) => Some(S::Uploading),
        (S::Preparing, E::FilesAdded | E::PreparationStarted) => Some(S::Preparing),

        (S::Ready, E::PreparationStarted | E::FilesAdded) => Some(S::Preparing),
        (S::Ready, E::UploadStarted) => Some(S::Uploading),

        (S::Uploading, E::UploadProgress | E::UploadStarted) => Some(S::Uploading),
        (S::Uploading, E::PreparationStarted) => Some(S::Preparing),
        (S::Uploading, E::PreparationCompleted) => Some(S::Ready),

        (
            S::Completed | S::Partial | S::Failed | S::Canceled,
            E::FilesAdded | E::PreparationStarted,
        ) => Some(S::Preparing),
        (S::Completed | S::Partial | S::Failed | S::Canceled, E::PreparationCompleted) => {
            Some(S::Ready)
        }
        (S::Completed | S::Partial | S::Failed | S::Canceled, E::UploadStarted) => {
            Some(S::Uploading)
        }

        _ => outcome,
    }
}

/// Picks the event implied by `ctx`, first match wins.
///
/// Returns `None` when the derived event would not change the state, except
/// for `UploadProgress`, which is always reported while uploading.
pub fn derive_event(state: SessionState, ctx: &SessionContext) -> Option<SessionEvent> {
    let candidate = if ctx.total_files == 0 {
        SessionEvent::Reset
    } else if state == SessionState::Idle {
        SessionEvent::FilesAdded
    } else if ctx.canceled_files == ctx.total_files {
        SessionEvent::AllCanceled
    } else if ctx.completed_files == ctx.total_files {
        SessionEvent::AllCompleted
    } else if ctx.total_files - ctx.canceled_files > 0
        && ctx.failed_files == ctx.total_files - ctx.canceled_files
    {
        SessionEvent::AllFailed
    } else if ctx.completed_files > 0 && (ctx.failed_files > 0 || ctx.canceled_files > 0) {
        SessionEvent::SomeFailed
    } else if ctx.uploading_files > 0 {
        if state == SessionState::Uploading {
            return Some(SessionEvent::UploadProgress);
        }
        SessionEvent::UploadStarted
    } else if ctx.preparing_files > 0 {
        SessionEvent::PreparationStarted
    } else if ctx.ready_files > 0 {
        SessionEvent::PreparationCompleted
    } else {
        return None;
    };

    match next_state(state, candidate) {
        Some(next) if next != state => Some(candidate),
        _ => None,
    }
}

pub type SessionListener = Box<dyn Fn(SessionState, &SessionContext) + Send + Sync>;

pub struct SessionMachine {
    state: SessionState,
    context: SessionContext,
    listeners: Vec<SessionListener>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMachine")
            .field("state", &self.state)
            .field("context", &self.context)
            .finish()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            context: SessionContext::default(),
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn subscribe(&mut self, listener: SessionListener) {
        self.listeners.push(listener);
    }

    /// Applies one event directly. Returns whether the state changed.
    pub fn send(&mut self, event: SessionEvent) -> bool {
        match next_state(self.state, event) {
            Some(next) => {
                let changed = next != self.state;
                if changed {
                    debug!(from = %self.state, to = %next, ?event, "session transition");
                }
                self.state = next;
                if changed || event == SessionEvent::UploadProgress {
                    self.notify();
                }
                changed
            }
            None => false,
        }
    }

    /// Re-derives the state from a fresh snapshot.
    pub fn update(&mut self, ctx: SessionContext) -> SessionState {
        self.context = ctx;
        // Bounded: every non-progress step moves to a different state and the
        // precedence rules settle within a few hops.
        for _ in 0..8 {
            match derive_event(self.state, &self.context) {
                Some(SessionEvent::UploadProgress) => {
                    self.send(SessionEvent::UploadProgress);
                    break;
                }
                Some(event) => {
                    self.send(event);
                }
                None => break,
            }
        }
        self.state
    }

    fn notify(&self) {
        for listener in &self.listeners {
            listener(self.state, &self.context);
        }
    }
}
