//! Adaptive micro-batching request scheduler for Context Graph inference.
//!
//! Callers submit single requests from many concurrent tasks. The scheduler
//! groups them into batches bounded by a maximum size and a maximum wait
//! window, hands each batch to a [`BatchInference`] collaborator, and routes
//! every per-request outcome back to the caller that submitted it.
//!
//! # Architecture
//!
//! - **Scheduler**: admission API and lifecycle (`start` / `stop`)
//! - **CompletionRegistry**: correlation id -> pending result slot
//! - **BatchAssembler**: single consumer of the bounded ingestion queue
//! - **BatchProcessor**: invokes the collaborator and distributes outcomes
//!
//! ```text
//! Caller 1 ─┬─► submit ──► queue ──► assembler ──► processor ──► collaborator
//! Caller 2 ─┤    (register)           (size/window)    │
//! Caller 3 ─┘                                          ▼
//!        ◄──────────── PendingResult ◄──────── registry.resolve(id)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use context_graph_scheduler::{
//!     BatchInference, BatchOutcomes, Request, Scheduler, SchedulerConfig, SchedulerResult,
//! };
//!
//! struct Lengths;
//!
//! #[async_trait]
//! impl BatchInference for Lengths {
//!     type Payload = String;
//!     type Output = usize;
//!
//!     async fn process_batch(
//!         &self,
//!         requests: Vec<Request<String>>,
//!     ) -> SchedulerResult<BatchOutcomes<usize>> {
//!         Ok(requests.into_iter().map(|r| (r.id, Ok(r.payload.len()))).collect())
//!     }
//! }
//!
//! # async fn run() -> SchedulerResult<()> {
//! let scheduler = Scheduler::new(Arc::new(Lengths), SchedulerConfig::default())?;
//! scheduler.start()?;
//! assert_eq!(scheduler.infer("hello".to_string()).await?, 5);
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod types;

pub use batch::{Batch, BatchInference, BatchOutcomes};
pub use config::{BackpressurePolicy, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use registry::{CompletionRegistry, PendingResult};
pub use scheduler::Scheduler;
pub use stats::SchedulerStatsSummary;
pub use types::{BatchId, FlushTrigger, Request, RequestId, SchedulerState};
