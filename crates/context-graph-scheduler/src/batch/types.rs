//! Assembled batch type.
//!
//! A [`Batch`] exists only between assembly and dispatch. It is owned by the
//! assembler task and handed to the processor by value.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::{BatchId, Request, RequestId};

/// Upper bound on slots reserved up front; larger batches grow on demand.
const MAX_PREALLOCATED: usize = 64;

/// Ordered, bounded group of requests dispatched together.
///
/// # Lifecycle
///
/// 1. Opened by the assembler with the first request of a window
/// 2. Filled with `push()` until the size or time trigger fires
/// 3. Consumed by the processor via `into_requests()`
#[derive(Debug)]
pub struct Batch<P> {
    /// Batch identifier for tracking.
    pub id: BatchId,

    /// Requests in admission order.
    requests: Vec<Request<P>>,

    /// When the first request joined (window start).
    opened_at: Instant,
}

impl<P> Batch<P> {
    /// Open a batch with its first request.
    ///
    /// `capacity` is the expected final size; at most `MAX_PREALLOCATED`
    /// slots are reserved.
    #[must_use]
    pub fn open(first: Request<P>, capacity: usize) -> Self {
        let mut requests = Vec::with_capacity(capacity.clamp(1, MAX_PREALLOCATED));
        requests.push(first);
        Self {
            id: BatchId::new(),
            requests,
            opened_at: Instant::now(),
        }
    }

    /// Build a batch from already-collected requests (drain path).
    #[must_use]
    pub fn from_requests(requests: Vec<Request<P>>) -> Self {
        Self {
            id: BatchId::new(),
            requests,
            opened_at: Instant::now(),
        }
    }

    /// Add a request to the end of the batch.
    #[inline]
    pub fn push(&mut self, request: Request<P>) {
        self.requests.push(request);
    }

    /// Number of requests in the batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if batch is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// When the batch window opened.
    #[inline]
    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Time since the window opened.
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Correlation ids, in batch order.
    #[must_use]
    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|r| r.id).collect()
    }

    /// Average time members spent between admission and now, in microseconds.
    #[must_use]
    pub fn avg_wait_us(&self) -> u64 {
        if self.requests.is_empty() {
            return 0;
        }
        let total: u128 = self.requests.iter().map(|r| r.elapsed().as_micros()).sum();
        u64::try_from(total / self.requests.len() as u128).unwrap_or(u64::MAX)
    }

    /// Consume the batch, yielding its requests in order.
    #[must_use]
    pub fn into_requests(self) -> Vec<Request<P>> {
        self.requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(payload: &'static str) -> Request<&'static str> {
        Request::new(RequestId::new(), payload)
    }

    #[test]
    fn test_batch_open_holds_first_request() {
        let first = request("a");
        let first_id = first.id;
        let batch = Batch::open(first, 8);

        assert_eq!(batch.len(), 1);
        assert!(!batch.is_empty());
        assert_eq!(batch.request_ids(), vec![first_id]);
        assert!(!batch.id.as_uuid().is_nil());
    }

    #[test]
    fn test_batch_preserves_admission_order() {
        let requests: Vec<_> = ["a", "b", "c"].into_iter().map(request).collect();
        let ids: Vec<_> = requests.iter().map(|r| r.id).collect();

        let mut iter = requests.into_iter();
        let mut batch = Batch::open(iter.next().unwrap(), 3);
        for r in iter {
            batch.push(r);
        }

        assert_eq!(batch.request_ids(), ids);
        let payloads: Vec<_> = batch.into_requests().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_batch_from_requests_empty() {
        let batch: Batch<&str> = Batch::from_requests(Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.avg_wait_us(), 0);
    }

    #[test]
    fn test_batch_open_with_unbounded_capacity() {
        let mut batch = Batch::open(request("a"), usize::MAX);
        batch.push(request("b"));

        assert_eq!(batch.len(), 2);
        assert!(batch.requests.capacity() <= MAX_PREALLOCATED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_avg_wait_uses_admission_times() {
        let early = request("a");
        tokio::time::advance(Duration::from_millis(10)).await;
        let late = request("b");
        tokio::time::advance(Duration::from_millis(5)).await;

        // (15ms + 5ms) / 2
        let batch = Batch::from_requests(vec![early, late]);
        assert_eq!(batch.avg_wait_us(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_elapsed_tracks_window() {
        let batch = Batch::open(request("a"), 4);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(batch.elapsed() >= Duration::from_millis(20));
    }
}
