//! Completion registry: correlation id -> unresolved result slot.
//!
//! Each admitted request owns exactly one entry. The entry's sender half is
//! held here; the receiver half is handed to the caller as a
//! [`PendingResult`]. Entries are removed exactly once, either when resolved
//! by the dispatcher or when admission is rolled back.
//!
//! # Thread Safety
//!
//! A single `parking_lot::Mutex` guards the map together with the `closed`
//! flag, so a registration racing `close()` is either fully registered before
//! the close or rejected. Results are sent after the lock is released.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::types::RequestId;

type Slot<O> = oneshot::Sender<SchedulerResult<O>>;

#[derive(Debug)]
struct RegistryInner<O> {
    pending: HashMap<RequestId, Slot<O>>,
    closed: bool,
}

/// Thread-safe map of admitted-but-unresolved requests.
#[derive(Debug)]
pub struct CompletionRegistry<O> {
    inner: Mutex<RegistryInner<O>>,
}

impl<O> Default for CompletionRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> CompletionRegistry<O> {
    /// Create an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                pending: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Register a new result slot under `id`.
    ///
    /// # Errors
    /// * `SchedulerError::AdmissionRejected` once the registry is closed
    /// * `SchedulerError::InternalCorrelationMissing` if `id` is already registered
    pub fn register(&self, id: RequestId) -> SchedulerResult<PendingResult<O>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SchedulerError::AdmissionRejected);
        }
        if inner.pending.contains_key(&id) {
            return Err(SchedulerError::InternalCorrelationMissing { id });
        }
        inner.pending.insert(id, tx);
        Ok(PendingResult { id, rx })
    }

    /// Withdraw an entry without resolving it (admission rollback).
    ///
    /// Returns `true` if the entry was present.
    pub fn remove(&self, id: RequestId) -> bool {
        self.inner.lock().pending.remove(&id).is_some()
    }

    /// Remove the entry for `id` and deliver `outcome` to its caller.
    ///
    /// A caller that already stopped waiting (deadline elapsed, future
    /// dropped) is not an error; the outcome is discarded.
    ///
    /// # Errors
    /// * `SchedulerError::InternalCorrelationMissing` if no entry exists
    pub fn resolve(&self, id: RequestId, outcome: SchedulerResult<O>) -> SchedulerResult<()> {
        let slot = self.inner.lock().pending.remove(&id);
        match slot {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(request_id = %id, "Caller no longer waiting, outcome discarded");
                }
                Ok(())
            }
            None => Err(SchedulerError::InternalCorrelationMissing { id }),
        }
    }

    /// Resolve every outstanding entry with a clone of `error`.
    ///
    /// Returns the number of entries resolved.
    pub fn fail_all(&self, error: &SchedulerError) -> usize {
        let drained: Vec<(RequestId, Slot<O>)> = self.inner.lock().pending.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Stop accepting registrations. Existing entries are unaffected.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: RequestId) -> bool {
        self.inner.lock().pending.contains_key(&id)
    }

    /// Number of unresolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// True when no entry is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

// ============================================================================
// PENDING RESULT
// ============================================================================

/// Caller's view of a single-assignment result slot.
///
/// Awaiting it yields the request's outcome. Dropping it does not remove the
/// request from its batch; the outcome is simply discarded on arrival.
#[derive(Debug)]
#[must_use = "a PendingResult does nothing unless awaited"]
pub struct PendingResult<O> {
    id: RequestId,
    rx: oneshot::Receiver<SchedulerResult<O>>,
}

impl<O> PendingResult<O> {
    /// Correlation id of the underlying request.
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the outcome, giving up after `timeout`.
    ///
    /// The deadline races the wait only; the request stays in whatever batch
    /// it was assigned to.
    ///
    /// # Errors
    /// * `SchedulerError::Timeout` if no outcome arrived in time
    /// * any error the request resolved with
    pub async fn with_timeout(self, timeout: Duration) -> SchedulerResult<O> {
        let id = self.id;
        match tokio::time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SchedulerError::Timeout {
                id,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Non-blocking check for a delivered outcome.
    pub fn try_take(&mut self) -> Option<SchedulerResult<O>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(SchedulerError::SchedulerDropped { id: self.id }))
            }
        }
    }
}

impl<O> Future for PendingResult<O> {
    type Output = SchedulerResult<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(SchedulerError::SchedulerDropped { id: this.id }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
