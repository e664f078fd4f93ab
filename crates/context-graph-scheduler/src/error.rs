//! Error type for every failure the scheduler can report.
//!
//! # Error Categories
//!
//! | Category | Variants | Who sees it |
//! |----------|----------|-------------|
//! | Admission | AdmissionRejected, QueueFull | `submit()` caller, synchronously |
//! | Processing | InferenceFailure | every caller in the failed batch |
//! | Waiting | Timeout, SchedulerDropped | the caller awaiting a `PendingResult` |
//! | Internal | InternalCorrelationMissing, AssemblerFatal | logs / all outstanding callers |
//! | Lifecycle | InvalidState | `start()` / `stop()` caller |
//! | Configuration | ConfigError | construction and config loading |
//!
//! The enum is `Clone` so one batch-level failure can be delivered to every
//! member of the batch as the same value.

use thiserror::Error;

use crate::types::{BatchId, RequestId, SchedulerState};

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors produced by the micro-batching scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    // === Admission Errors ===
    /// Submission attempted after `stop()` was called.
    #[error("Admission rejected: scheduler is stopping or stopped")]
    AdmissionRejected,

    /// Ingestion queue full under the reject-fast backpressure policy.
    #[error("Ingestion queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    // === Processing Errors ===
    /// The inference collaborator failed for the whole batch, or returned
    /// no outcome for this request.
    #[error("Inference failed for batch {batch_id}: {message}")]
    InferenceFailure { batch_id: BatchId, message: String },

    // === Waiting Errors ===
    /// Caller-side deadline elapsed before an outcome arrived.
    /// The request itself stays in its batch.
    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout { id: RequestId, timeout_ms: u64 },

    /// The scheduler was dropped without `stop()` while the request was pending.
    #[error("Scheduler dropped before request {id} was resolved")]
    SchedulerDropped { id: RequestId },

    // === Internal Errors ===
    /// Dispatcher received an outcome for an id that is not registered.
    /// Logged only; there is no caller to notify.
    #[error("No pending request registered for id {id}")]
    InternalCorrelationMissing { id: RequestId },

    /// The assembler task died outside of any batch.
    #[error("Batch assembler failed: {message}")]
    AssemblerFatal { message: String },

    // === Lifecycle Errors ===
    /// Lifecycle operation not valid in the current state.
    #[error("Cannot {operation} scheduler in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SchedulerState,
    },

    // === Configuration Errors ===
    /// Configuration value invalid or config file unreadable.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl SchedulerError {
    /// Create an inference failure for a batch from any displayable error.
    pub fn inference<E: std::fmt::Display>(batch_id: BatchId, e: E) -> Self {
        Self::InferenceFailure {
            batch_id,
            message: e.to_string(),
        }
    }

    /// Create a configuration error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_failure_message() {
        let batch_id = BatchId::new();
        let err = SchedulerError::inference(batch_id, "device lost");

        assert!(matches!(
            &err,
            SchedulerError::InferenceFailure { batch_id: id, .. } if *id == batch_id
        ));
        let msg = err.to_string();
        assert!(msg.contains("device lost"));
        assert!(msg.contains(&batch_id.to_string()));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = SchedulerError::InvalidState {
            operation: "start",
            state: SchedulerState::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot start scheduler in state Stopped");
    }

    #[test]
    fn test_clone_preserves_equality() {
        let err = SchedulerError::inference(BatchId::new(), "boom");
        assert_eq!(err.clone(), err);
    }
}
