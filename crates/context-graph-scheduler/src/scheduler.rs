//! Scheduler: admission API and lifecycle controller.
//!
//! Owns the ingestion queue, the completion registry and the assembler task.
//!
//! # Lifecycle
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopping --(drain complete)--> Stopped
//!    └──────────────stop()──────────────────┘
//! ```
//!
//! 1. Create with `new()` - nothing runs yet, submissions are buffered
//! 2. `start()` - spawns the assembler
//! 3. Submit requests with `submit()` / `infer()`
//! 4. `stop()` - rejects new work, drains everything admitted, then returns
//!
//! After `stop()` returns the completion registry is empty: every admitted
//! request has been resolved.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::batch::assembler::{BatchAssembler, ShutdownSignal};
use crate::batch::processor::{panic_message, BatchInference, BatchProcessor};
use crate::config::{BackpressurePolicy, SchedulerConfig};
use crate::error::{SchedulerError, SchedulerResult};
use crate::registry::{CompletionRegistry, PendingResult};
use crate::stats::{SchedulerStats, SchedulerStatsSummary};
use crate::types::{Request, RequestId, SchedulerState};

// ============================================================================
// SCHEDULER
// ============================================================================

/// Adaptive micro-batching scheduler.
///
/// Many tasks may call [`submit`](Self::submit) concurrently; a single
/// assembler task groups their requests into batches for the
/// [`BatchInference`] collaborator and each caller receives its own outcome.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = Scheduler::new(Arc::new(MyModel::load()?), SchedulerConfig::default())?;
/// scheduler.start()?;
///
/// let embedding = scheduler.infer(input).await?;
///
/// scheduler.stop().await?;
/// ```
pub struct Scheduler<M: BatchInference> {
    config: SchedulerConfig,
    inference: Arc<M>,

    /// Producer side of the ingestion queue.
    request_tx: mpsc::Sender<Request<M::Payload>>,

    /// Consumer side, moved into the assembler on start.
    request_rx: Mutex<Option<mpsc::Receiver<Request<M::Payload>>>>,

    registry: Arc<CompletionRegistry<M::Output>>,
    stats: Arc<SchedulerStats>,
    shutdown: Arc<ShutdownSignal>,
    state_tx: Arc<watch::Sender<SchedulerState>>,

    /// Task that awaits the assembler and finalizes shutdown.
    supervisor: Mutex<Option<JoinHandle<()>>>,

    /// Abort handle of the assembler task, used on drop.
    assembler_abort: Mutex<Option<AbortHandle>>,
}

impl<M: BatchInference> Scheduler<M> {
    /// Create a scheduler in the `Created` state.
    ///
    /// # Errors
    /// * `SchedulerError::ConfigError` if config is invalid
    pub fn new(inference: Arc<M>, config: SchedulerConfig) -> SchedulerResult<Self> {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::channel(config.queue_capacity);
        let (state_tx, _) = watch::channel(SchedulerState::Created);

        Ok(Self {
            config,
            inference,
            request_tx,
            request_rx: Mutex::new(Some(request_rx)),
            registry: Arc::new(CompletionRegistry::new()),
            stats: Arc::new(SchedulerStats::default()),
            shutdown: Arc::new(ShutdownSignal::default()),
            state_tx: Arc::new(state_tx),
            supervisor: Mutex::new(None),
            assembler_abort: Mutex::new(None),
        })
    }

    // ========================================================================
    // ADMISSION
    // ========================================================================

    /// Admit a request and return a handle to its eventual outcome.
    ///
    /// The result slot is registered before the request is enqueued. When the
    /// queue is full this suspends until capacity frees (or fails with
    /// `QueueFull` under `BackpressurePolicy::Reject`).
    ///
    /// # Errors
    /// * `SchedulerError::AdmissionRejected` once `stop()` has been called
    /// * `SchedulerError::QueueFull` under the reject-fast policy
    pub async fn submit(&self, payload: M::Payload) -> SchedulerResult<PendingResult<M::Output>> {
        if !self.state().accepts_submissions() {
            self.stats.record_rejected();
            return Err(SchedulerError::AdmissionRejected);
        }

        let id = RequestId::new();
        let pending = match self.registry.register(id) {
            Ok(pending) => pending,
            Err(e) => {
                self.stats.record_rejected();
                return Err(e);
            }
        };

        // Rolls the registration back if enqueue fails or this future is
        // dropped while suspended on a full queue.
        let guard = AdmissionGuard {
            registry: &self.registry,
            id,
            armed: true,
        };

        let request = Request::new(id, payload);
        let enqueued = match self.config.backpressure {
            BackpressurePolicy::Suspend => self
                .request_tx
                .send(request)
                .await
                .map_err(|_| SchedulerError::AdmissionRejected),
            BackpressurePolicy::Reject => self.request_tx.try_send(request).map_err(|e| match e {
                TrySendError::Full(_) => SchedulerError::QueueFull {
                    capacity: self.config.queue_capacity,
                },
                TrySendError::Closed(_) => SchedulerError::AdmissionRejected,
            }),
        };

        if let Err(e) = enqueued {
            drop(guard);
            self.stats.record_rejected();
            debug!(request_id = %id, error = %e, "Admission failed");
            return Err(e);
        }

        guard.disarm();
        self.stats.record_submitted();
        trace!(request_id = %id, "Request admitted");
        Ok(pending)
    }

    /// Submit and wait for the outcome.
    ///
    /// Applies `default_request_timeout_ms` from the config when set.
    pub async fn infer(&self, payload: M::Payload) -> SchedulerResult<M::Output> {
        let pending = self.submit(payload).await?;
        match self.config.default_request_timeout() {
            Some(timeout) => pending.with_timeout(timeout).await,
            None => pending.await,
        }
    }

    /// Submit and wait for the outcome, giving up after `timeout`.
    ///
    /// The deadline covers the wait for the outcome, not admission. A timed
    /// out request still runs in its batch; its outcome is discarded.
    pub async fn infer_with_timeout(
        &self,
        payload: M::Payload,
        timeout: Duration,
    ) -> SchedulerResult<M::Output> {
        self.submit(payload).await?.with_timeout(timeout).await
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Spawn the batch assembler. Only valid from `Created`.
    ///
    /// # Errors
    /// * `SchedulerError::InvalidState` if already started or stopped
    pub fn start(&self) -> SchedulerResult<()> {
        let (_, started) = transition(&self.state_tx, SchedulerState::Running, |current| {
            current == SchedulerState::Created
        });
        if !started {
            return Err(SchedulerError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }

        self.spawn_assembler()?;

        info!(
            max_batch_size = self.config.max_batch_size,
            batch_window_ms = self.config.batch_window_ms,
            queue_capacity = self.config.queue_capacity,
            backpressure = ?self.config.backpressure,
            "Scheduler started"
        );
        Ok(())
    }

    /// Graceful shutdown.
    ///
    /// After calling stop:
    /// 1. New submissions fail with `AdmissionRejected`
    /// 2. Everything already admitted is dispatched, including a partially
    ///    filled batch
    /// 3. Returns once every admitted request has been resolved
    ///
    /// Calling it again, or concurrently, waits for the same completion.
    pub async fn stop(&self) -> SchedulerResult<()> {
        let (previous, initiated) = transition(
            &self.state_tx,
            SchedulerState::Stopping,
            SchedulerState::accepts_submissions,
        );

        if initiated {
            info!(
                from = ?previous,
                pending = self.registry.len(),
                queued = self.queue_depth(),
                "Stopping scheduler"
            );
            self.registry.close();
            if previous == SchedulerState::Created {
                // Nothing was consuming the queue yet; spawn the assembler
                // so buffered submissions are drained like any other.
                self.spawn_assembler()?;
            }
            self.shutdown.trigger();
        }

        let mut state_rx = self.state_tx.subscribe();
        state_rx
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| SchedulerError::AssemblerFatal {
                message: "lifecycle channel closed before shutdown completed".to_string(),
            })?;

        if let Some(handle) = self.supervisor.lock().take() {
            // Already finished: it published `Stopped` as its last step.
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler supervisor task failed");
            }
        }
        Ok(())
    }

    fn spawn_assembler(&self) -> SchedulerResult<()> {
        let rx = self
            .request_rx
            .lock()
            .take()
            .ok_or(SchedulerError::InvalidState {
                operation: "spawn assembler for",
                state: self.state(),
            })?;

        let processor = BatchProcessor::new(
            Arc::clone(&self.inference),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
        );
        let assembler = BatchAssembler::new(
            rx,
            processor,
            Arc::clone(&self.shutdown),
            self.config.max_batch_size,
            self.config.batch_window(),
        );

        let assembler_handle = tokio::spawn(assembler.run());
        *self.assembler_abort.lock() = Some(assembler_handle.abort_handle());

        let supervisor = tokio::spawn(supervise(
            assembler_handle,
            Arc::clone(&self.registry),
            Arc::clone(&self.state_tx),
        ));
        *self.supervisor.lock() = Some(supervisor);
        Ok(())
    }

    // ========================================================================
    // QUERY METHODS
    // ========================================================================

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// Check if the assembler is accepting and batching work.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Requests currently buffered in the ingestion queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.request_tx.max_capacity() - self.request_tx.capacity()
    }

    /// Admitted requests not yet resolved.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Get current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStatsSummary {
        self.stats.summary()
    }

    /// Get the scheduler configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl<M: BatchInference> Drop for Scheduler<M> {
    fn drop(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        // Cannot await in Drop; abort instead. Outstanding callers observe
        // `SchedulerDropped` once the registry is released.
        self.registry.close();
        if let Some(handle) = self.assembler_abort.lock().take() {
            handle.abort();
            debug!("Scheduler dropped without stop(): assembler task aborted");
        }
    }
}

// ============================================================================
// ADMISSION GUARD
// ============================================================================

/// Removes a registry entry on drop unless admission completed.
struct AdmissionGuard<'a, O> {
    registry: &'a CompletionRegistry<O>,
    id: RequestId,
    armed: bool,
}

impl<O> AdmissionGuard<'_, O> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<O> Drop for AdmissionGuard<'_, O> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.remove(self.id);
        }
    }
}

// ============================================================================
// SUPERVISOR
// ============================================================================

/// Await the assembler and finish the lifecycle.
///
/// On a clean exit every admitted request has already been resolved by the
/// drain; anything still registered lost the race with `close()` and is
/// rejected. On a crash every outstanding request is failed with
/// `AssemblerFatal`. Either way the state ends at `Stopped`.
async fn supervise<O>(
    assembler: JoinHandle<()>,
    registry: Arc<CompletionRegistry<O>>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
) {
    match assembler.await {
        Ok(()) => {
            let leftover = registry.fail_all(&SchedulerError::AdmissionRejected);
            if leftover > 0 {
                warn!(leftover, "Rejected admissions that raced shutdown");
            }
        }
        Err(e) if e.is_cancelled() => {
            debug!("Batch assembler cancelled");
        }
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                e.to_string()
            };
            error!(error = %message, "Batch assembler crashed");
            registry.close();
            let failed = registry.fail_all(&SchedulerError::AssemblerFatal { message });
            error!(failed, "Failed outstanding requests after assembler crash");
        }
    }

    transition(&state_tx, SchedulerState::Stopped, |_| true);
    info!("Scheduler stopped");
}

/// Move the lifecycle to `next` when `allowed` accepts the current state and
/// the move is forward.
///
/// Returns the state seen before the attempt and whether it changed.
fn transition(
    state_tx: &watch::Sender<SchedulerState>,
    next: SchedulerState,
    allowed: impl FnOnce(SchedulerState) -> bool,
) -> (SchedulerState, bool) {
    let mut previous = next;
    let changed = state_tx.send_if_modified(|state| {
        previous = *state;
        if allowed(*state) && state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    });
    (previous, changed)
}

// ============================================================================
// TESTS
// ============================================================================
