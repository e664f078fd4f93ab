//! Batch assembly and dispatch.
//!
//! - **`Batch`**: ordered group of requests between assembly and dispatch
//! - **`BatchAssembler`**: drains the ingestion queue into size/time-bounded batches
//! - **`BatchProcessor`**: calls the [`BatchInference`] collaborator and
//!   resolves each member's result slot
//!
//! # Flow
//!
//! ```text
//! queue ──► Assembler ──► Batch ──► Processor ──► collaborator
//!           (collect)              (dispatch)         │
//!                                      ▲              │
//!                                      └── outcomes ──┘
//! ```
//!
//! Exactly one assembler runs per scheduler, and it awaits each batch before
//! opening the next window, so at most one batch is in flight.

pub(crate) mod assembler;
pub(crate) mod processor;
mod types;

pub use processor::{BatchInference, BatchOutcomes, BatchProcessor};
pub use types::Batch;
