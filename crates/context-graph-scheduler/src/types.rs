//! Core value types shared by the admission path, the assembler and the
//! lifecycle controller.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Correlation identifier for a single admitted request.
///
/// Always generated by the scheduler, never by the caller, so two submissions
/// with identical payloads still resolve independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one dispatched batch, used in logs and failure values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// An admitted unit of work.
///
/// Immutable once created; the assembler moves it into a [`Batch`] and the
/// batch hands it to the inference collaborator by value.
///
/// [`Batch`]: crate::batch::Batch
#[derive(Debug)]
pub struct Request<P> {
    /// Scheduler-generated correlation id.
    pub id: RequestId,

    /// Opaque input for the collaborator.
    pub payload: P,

    /// When the request was admitted, on the same clock as batch windows.
    pub submitted_at: Instant,
}

impl<P> Request<P> {
    pub(crate) fn new(id: RequestId, payload: P) -> Self {
        Self {
            id,
            payload,
            submitted_at: Instant::now(),
        }
    }

    /// Time spent since admission.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

// ============================================================================
// LIFECYCLE STATE
// ============================================================================

/// Scheduler lifecycle.
///
/// Transitions are monotonic:
/// `Created -> Running -> Stopping -> Stopped`. `Created -> Stopping` is
/// allowed when `stop()` is called before `start()`, and an assembler crash
/// jumps straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchedulerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl SchedulerState {
    /// True while new submissions are admitted.
    #[inline]
    #[must_use]
    pub fn accepts_submissions(self) -> bool {
        matches!(self, Self::Created | Self::Running)
    }

    /// True once no further transition is possible.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    #[inline]
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next > self
    }
}

// ============================================================================
// FLUSH TRIGGER
// ============================================================================

/// Why a batch window closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Batch reached `max_batch_size`.
    Size,
    /// `batch_window` elapsed since the first item arrived.
    Window,
    /// Final flush while shutting down.
    Drain,
}

impl FlushTrigger {
    /// Short label for structured logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Window => "window",
            Self::Drain => "drain",
        }
    }
}
