//! Host-side batch execution.
//!
//! A host pipeline may invoke one kernel node for many independent data
//! batches in parallel. [`BatchRunner`] does this with a fixed worker pool fed
//! through crossbeam channels:
//!
//! ```text
//!            ┌──► worker 0 ──┐
//! [batches] ─┼──► worker 1 ──┼──► [results, sorted by index]
//!            └──► worker N ──┘
//!                  │
//!                  └── dispatch holds the shared backend lease
//! ```
//!
//! Cancellation is checked between invocations only.

pub mod batch;
pub mod error;

pub use batch::{BatchInputs, BatchOutcome, BatchResult, BatchRunner, CancelHandle};
pub use error::{PipelineError, PipelineResult};
