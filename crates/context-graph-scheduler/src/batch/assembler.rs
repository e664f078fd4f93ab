//! Batch assembler: the single consumer of the ingestion queue.
//!
//! # State machine
//!
//! ```text
//!            first item              size reached / window elapsed
//!   Idle ───────────────► Collecting ─────────────────────────────► Dispatching
//!    ▲                         │                                        │
//!    └─────────────────────────┼──────────── batch resolved ────────────┘
//!                              │ shutdown
//!                              ▼
//!                          Draining (terminal)
//! ```
//!
//! The assembler never polls. In `Idle` it waits on the queue; in
//! `Collecting` it greedily takes whatever is already buffered and then
//! races the next item against the window deadline. On shutdown it closes
//! the queue, collects everything buffered (including the open batch) and
//! dispatches it before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::types::{FlushTrigger, Request};

use super::processor::{BatchInference, BatchProcessor};
use super::types::Batch;

// ============================================================================
// STATE
// ============================================================================

/// Assembler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AssemblerState {
    /// No open window; waiting for the first item.
    Idle,
    /// Window open, accumulating items.
    Collecting,
    /// Batch handed to the processor.
    Dispatching,
    /// Shutdown flush in progress. Terminal.
    Draining,
}

/// Result of one collection window.
enum Collected {
    Flush(FlushTrigger),
    Shutdown,
}

// ============================================================================
// SHUTDOWN SIGNAL
// ============================================================================

/// Level-triggered shutdown flag with an async wake-up.
#[derive(Debug, Default)]
pub(crate) struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub(crate) fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once `trigger()` has been called.
    ///
    /// `notify_one` stores a permit when nobody is waiting, so a trigger
    /// landing between the flag check and the await is not lost.
    pub(crate) async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// Drains the ingestion queue into time/size-bounded batches.
pub(crate) struct BatchAssembler<M: BatchInference> {
    rx: mpsc::Receiver<Request<M::Payload>>,
    processor: BatchProcessor<M>,
    shutdown: Arc<ShutdownSignal>,
    max_batch_size: usize,
    batch_window: Duration,
    state: AssemblerState,
}

impl<M: BatchInference> BatchAssembler<M> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Request<M::Payload>>,
        processor: BatchProcessor<M>,
        shutdown: Arc<ShutdownSignal>,
        max_batch_size: usize,
        batch_window: Duration,
    ) -> Self {
        Self {
            rx,
            processor,
            shutdown,
            max_batch_size,
            batch_window,
            state: AssemblerState::Idle,
        }
    }

    /// Run until shutdown, then drain. Consumes the assembler.
    pub(crate) async fn run(mut self) {
        info!(
            max_batch_size = self.max_batch_size,
            batch_window_ms = self.batch_window.as_millis(),
            "Batch assembler started"
        );

        loop {
            self.transition(AssemblerState::Idle);
            if self.shutdown.is_triggered() {
                break;
            }

            let first = tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                next = self.rx.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            self.transition(AssemblerState::Collecting);
            let mut batch = Batch::open(first, self.max_batch_size);
            let deadline = batch.opened_at() + self.batch_window;

            match self.collect(&mut batch, deadline).await {
                Collected::Flush(trigger) => {
                    self.transition(AssemblerState::Dispatching);
                    self.processor.process(batch, trigger).await;
                }
                Collected::Shutdown => {
                    self.drain(Some(batch)).await;
                    return;
                }
            }
        }

        self.drain(None).await;
    }

    /// Fill `batch` until it is full, the deadline passes, or shutdown.
    async fn collect(&mut self, batch: &mut Batch<M::Payload>, deadline: Instant) -> Collected {
        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);

        loop {
            if batch.len() >= self.max_batch_size {
                return Collected::Flush(FlushTrigger::Size);
            }
            if Instant::now() >= deadline {
                return Collected::Flush(FlushTrigger::Window);
            }

            // Take what is already buffered without suspending.
            match self.rx.try_recv() {
                Ok(request) => {
                    batch.push(request);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Collected::Shutdown,
            }

            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return Collected::Shutdown,
                _ = &mut window => return Collected::Flush(FlushTrigger::Window),
                next = self.rx.recv() => match next {
                    Some(request) => batch.push(request),
                    None => return Collected::Shutdown,
                },
            }
        }
    }

    /// Final flush: close the queue, gather everything buffered plus the
    /// open batch, and dispatch it in chunks of at most `max_batch_size`.
    async fn drain(mut self, open: Option<Batch<M::Payload>>) {
        self.transition(AssemblerState::Draining);

        // No send can succeed after this; blocked producers are woken with
        // an error and roll back their own admission.
        self.rx.close();

        let mut pending: Vec<Request<M::Payload>> =
            open.map(Batch::into_requests).unwrap_or_default();
        while let Some(request) = self.rx.recv().await {
            pending.push(request);
        }

        let total = pending.len();
        let mut batches = 0usize;
        let mut remaining = pending.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<_> = remaining.by_ref().take(self.max_batch_size).collect();
            self.processor
                .process(Batch::from_requests(chunk), FlushTrigger::Drain)
                .await;
            batches += 1;
        }

        info!(requests = total, batches, "Batch assembler drained");
    }

    fn transition(&mut self, next: AssemblerState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "Assembler transition");
            self.state = next;
        }
    }
}

impl<M: BatchInference> Drop for BatchAssembler<M> {
    fn drop(&mut self) {
        if self.state != AssemblerState::Draining {
            debug!(state = ?self.state, "Batch assembler dropped before draining");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::processor::BatchOutcomes;
    use crate::error::SchedulerResult;
    use crate::registry::{CompletionRegistry, PendingResult};
    use crate::stats::SchedulerStats;
    use crate::types::RequestId;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every batch with the (paused) time it was dispatched at.
    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<(Instant, Vec<u32>)>>,
    }

    #[async_trait]
    impl BatchInference for Recorder {
        type Payload = u32;
        type Output = u32;

        async fn process_batch(
            &self,
            requests: Vec<Request<u32>>,
        ) -> SchedulerResult<BatchOutcomes<u32>> {
            self.batches
                .lock()
                .push((Instant::now(), requests.iter().map(|r| r.payload).collect()));
            Ok(requests.into_iter().map(|r| (r.id, Ok(r.payload))).collect())
        }
    }

    struct Harness {
        tx: mpsc::Sender<Request<u32>>,
        registry: Arc<CompletionRegistry<u32>>,
        recorder: Arc<Recorder>,
        shutdown: Arc<ShutdownSignal>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn_assembler(max_batch_size: usize, window_ms: u64, capacity: usize) -> Harness {
        let (tx, rx) = mpsc::channel(capacity);
        let registry = Arc::new(CompletionRegistry::new());
        let recorder = Arc::new(Recorder::default());
        let shutdown = Arc::new(ShutdownSignal::default());
        let processor = BatchProcessor::new(
            recorder.clone(),
            registry.clone(),
            Arc::new(SchedulerStats::default()),
        );
        let assembler = BatchAssembler::new(
            rx,
            processor,
            shutdown.clone(),
            max_batch_size,
            Duration::from_millis(window_ms),
        );
        let handle = tokio::spawn(assembler.run());
        Harness {
            tx,
            registry,
            recorder,
            shutdown,
            handle,
        }
    }

    async fn admit(h: &Harness, payload: u32) -> PendingResult<u32> {
        let id = RequestId::new();
        let pending = h.registry.register(id).unwrap();
        h.tx.send(Request::new(id, payload)).await.unwrap();
        pending
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_trigger_flushes_partial_batch() {
        let h = spawn_assembler(16, 50, 64);
        let start = Instant::now();

        let mut pendings = Vec::new();
        for i in 0..5 {
            pendings.push(admit(&h, i).await);
        }
        for (i, pending) in pendings.into_iter().enumerate() {
            assert_eq!(pending.await, Ok(i as u32));
        }

        let batches = h.recorder.batches.lock().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![0, 1, 2, 3, 4]);
        let dispatched_after = batches[0].0 - start;
        assert!(dispatched_after >= Duration::from_millis(50));
        assert!(dispatched_after < Duration::from_millis(51));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_flushes_immediately() {
        let h = spawn_assembler(4, 1_000, 64);
        let start = Instant::now();

        let mut pendings = Vec::new();
        for i in 0..4 {
            pendings.push(admit(&h, i).await);
        }
        for pending in pendings {
            assert!(pending.await.is_ok());
        }

        let batches = h.recorder.batches.lock().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 4);
        assert!(batches[0].0 - start < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_open_window() {
        let h = spawn_assembler(16, 10_000, 64);

        let mut pendings = Vec::new();
        for i in 0..3 {
            pendings.push(admit(&h, i).await);
        }
        // Let the assembler open the window before signalling.
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.shutdown.trigger();
        h.handle.await.unwrap();

        assert!(h.registry.is_empty());
        for pending in pendings {
            assert!(pending.await.is_ok());
        }
        let batches = h.recorder.batches.lock().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_respects_max_batch_size() {
        let h = spawn_assembler(2, 10_000, 64);
        h.shutdown.trigger();

        // Buffered before the assembler observes the signal.
        let mut pendings = Vec::new();
        for i in 0..5 {
            let id = RequestId::new();
            pendings.push(h.registry.register(id).unwrap());
            h.tx.try_send(Request::new(id, i)).unwrap();
        }
        h.handle.await.unwrap();

        for pending in pendings {
            assert!(pending.await.is_ok());
        }
        let sizes: Vec<usize> = h
            .recorder
            .batches
            .lock()
            .iter()
            .map(|(_, payloads)| payloads.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_closed_after_drain() {
        let h = spawn_assembler(4, 50, 8);
        h.shutdown.trigger();
        h.handle.await.unwrap();

        let result = h.tx.send(Request::new(RequestId::new(), 1)).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_shutdown_dispatches_nothing() {
        let h = spawn_assembler(4, 50, 8);
        tokio::time::sleep(Duration::from_millis(200)).await;
        h.shutdown.trigger();
        h.handle.await.unwrap();

        assert!(h.recorder.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_signal_before_wait() {
        let signal = ShutdownSignal::default();
        signal.trigger();
        assert!(signal.is_triggered());
        // Completes immediately instead of hanging.
        signal.wait().await;
    }
}
