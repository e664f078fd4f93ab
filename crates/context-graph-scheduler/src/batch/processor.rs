//! Batch processor and result dispatcher.
//!
//! The processor hands an assembled batch to the external inference
//! collaborator and maps what comes back onto the completion registry.
//! Outcomes are correlated strictly by [`RequestId`], never by position.
//!
//! # Failure containment
//!
//! | Collaborator behaviour | Effect |
//! |------------------------|--------|
//! | `Ok(outcomes)` | each outcome resolves its request |
//! | `Ok(..)` missing some ids | missing ids resolve with `InferenceFailure` |
//! | `Ok(..)` with unknown/duplicate ids | logged as `InternalCorrelationMissing` |
//! | `Err(e)` | every member resolves with the same `InferenceFailure` |
//! | panic | same as `Err`, message taken from the panic payload |
//!
//! None of these stop the assembler loop.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::CompletionRegistry;
use crate::stats::SchedulerStats;
use crate::types::{BatchId, FlushTrigger, Request, RequestId};

use super::types::Batch;

/// Per-request outcomes returned by a collaborator, in any order.
pub type BatchOutcomes<O> = Vec<(RequestId, SchedulerResult<O>)>;

// ============================================================================
// COLLABORATOR TRAIT
// ============================================================================

/// External inference collaborator invoked once per batch.
///
/// Implementations receive the batch's requests in admission order and must
/// return an outcome for every id they were given. Returning `Err` fails the
/// whole batch.
///
/// # Example
///
/// ```rust,ignore
/// struct Doubler;
///
/// #[async_trait]
/// impl BatchInference for Doubler {
///     type Payload = u64;
///     type Output = u64;
///
///     async fn process_batch(
///         &self,
///         requests: Vec<Request<u64>>,
///     ) -> SchedulerResult<BatchOutcomes<u64>> {
///         Ok(requests.into_iter().map(|r| (r.id, Ok(r.payload * 2))).collect())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchInference: Send + Sync + 'static {
    /// Opaque per-request input.
    type Payload: Send + 'static;

    /// Per-request output.
    type Output: Send + 'static;

    /// Run inference for one batch.
    ///
    /// # Errors
    /// Any error fails every request of the batch with `InferenceFailure`.
    async fn process_batch(
        &self,
        requests: Vec<Request<Self::Payload>>,
    ) -> SchedulerResult<BatchOutcomes<Self::Output>>;
}

// ============================================================================
// BATCH PROCESSOR
// ============================================================================

/// Invokes the collaborator for a batch and resolves its members.
pub struct BatchProcessor<M: BatchInference> {
    inference: Arc<M>,
    registry: Arc<CompletionRegistry<M::Output>>,
    stats: Arc<SchedulerStats>,
}

impl<M: BatchInference> BatchProcessor<M> {
    /// Create a processor resolving into `registry`.
    pub fn new(
        inference: Arc<M>,
        registry: Arc<CompletionRegistry<M::Output>>,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            inference,
            registry,
            stats,
        }
    }

    /// Process one batch to completion.
    ///
    /// Every member of the batch is resolved before this returns. Empty
    /// batches are ignored.
    pub async fn process(&self, batch: Batch<M::Payload>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }

        let batch_id = batch.id;
        let size = batch.len();
        let avg_wait_us = batch.avg_wait_us();
        let window_us = batch.elapsed().as_micros();
        let request_ids = batch.request_ids();
        self.stats.record_batch(size, trigger, avg_wait_us);

        debug!(
            batch_id = %batch_id,
            size,
            trigger = trigger.as_str(),
            avg_wait_us,
            window_us,
            "Dispatching batch"
        );

        let started = Instant::now();
        let requests = batch.into_requests();
        let inference = Arc::clone(&self.inference);
        let joined = tokio::spawn(async move { inference.process_batch(requests).await }).await;

        match joined {
            Ok(Ok(outcomes)) => self.dispatch_outcomes(batch_id, &request_ids, outcomes),
            Ok(Err(e)) => {
                let failure = match e {
                    SchedulerError::InferenceFailure { message, .. } => {
                        SchedulerError::InferenceFailure { batch_id, message }
                    }
                    other => SchedulerError::inference(batch_id, other),
                };
                self.fail_batch(batch_id, &request_ids, failure);
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("inference panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "inference task cancelled".to_string()
                };
                let failure = SchedulerError::inference(batch_id, message);
                self.fail_batch(batch_id, &request_ids, failure);
            }
        }

        debug!(
            batch_id = %batch_id,
            size,
            duration_ms = started.elapsed().as_millis(),
            "Batch complete"
        );
    }

    /// Resolve every member of a batch with the same failure value.
    fn fail_batch(&self, batch_id: BatchId, request_ids: &[RequestId], failure: SchedulerError) {
        warn!(
            batch_id = %batch_id,
            size = request_ids.len(),
            error = %failure,
            "Batch failed, failing all members"
        );
        self.stats.record_batch_failure();

        for &id in request_ids {
            match self.registry.resolve(id, Err(failure.clone())) {
                Ok(()) => self.stats.record_completion(false),
                Err(e) => self.report_correlation_miss(batch_id, &e),
            }
        }
    }

    /// Resolve registry entries from collaborator outcomes, matched by id.
    fn dispatch_outcomes(
        &self,
        batch_id: BatchId,
        request_ids: &[RequestId],
        outcomes: BatchOutcomes<M::Output>,
    ) {
        let mut expected: HashSet<RequestId> = request_ids.iter().copied().collect();

        for (id, outcome) in outcomes {
            // Only ids of this batch may be resolved here; anything else
            // belongs to another request or to none.
            if !expected.remove(&id) {
                self.report_correlation_miss(
                    batch_id,
                    &SchedulerError::InternalCorrelationMissing { id },
                );
                continue;
            }

            let success = outcome.is_ok();
            match self.registry.resolve(id, outcome) {
                Ok(()) => self.stats.record_completion(success),
                Err(e) => self.report_correlation_miss(batch_id, &e),
            }
        }

        if expected.is_empty() {
            return;
        }

        warn!(
            batch_id = %batch_id,
            missing = expected.len(),
            "Collaborator returned no outcome for some requests"
        );
        // Preserve batch order for deterministic resolution.
        for &id in request_ids.iter().filter(|id| expected.contains(*id)) {
            let failure = SchedulerError::inference(
                batch_id,
                format!("no outcome returned for request {id}"),
            );
            match self.registry.resolve(id, Err(failure)) {
                Ok(()) => self.stats.record_completion(false),
                Err(e) => self.report_correlation_miss(batch_id, &e),
            }
        }
    }

    fn report_correlation_miss(&self, batch_id: BatchId, error: &SchedulerError) {
        self.stats.record_correlation_miss();
        error!(batch_id = %batch_id, error = %error, "Outcome could not be correlated");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================
