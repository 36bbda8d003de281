//! FundRail Workflow Runtime
//!
//! Durable step execution for event-triggered workflows.
//!
//! # Architecture
//!
//! - **Named steps**: a workflow is a sequence of named steps; each step
//!   executes at least once and is independently retried with
//!   exponential backoff
//! - **Step log**: completed step results are recorded keyed by
//!   (run id, step name) and replayed on re-execution, so retrying a
//!   run after a mid-run crash does not re-run finished steps
//! - **Events**: workflows chain by emitting fire-and-forget events
//!   after their state changes commit
//!
//! Two runs over the same entities may execute concurrently; workflows
//! rely on the store's conditional updates for correctness, never on
//! mutual exclusion here.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod event;
pub mod retry;
pub mod step;

// Re-exports
pub use error::{Error, Result};
pub use event::{Event, EventSink, MemorySink, NullSink};
pub use retry::{RetryConfig, RetryPolicy};
pub use step::{Run, StepLog};
