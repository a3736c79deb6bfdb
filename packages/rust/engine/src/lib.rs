//! Domain-fair, budget-bounded concurrent batch processor.
//!
//! Every FeedHarvest pipeline stage — feed scraping, full-content fetching,
//! and the paid generative-text passes — pushes its items through this one
//! engine. The engine owns:
//!
//! - **Ordering** ([`partition`]): round-robin interleaving by partition so
//!   interrupted runs still cover every source roughly equally.
//! - **Admission** ([`admission`]): a global in-flight cap, a per-partition
//!   cap, per-partition politeness spacing, and a monetary budget gate.
//! - **Execution** ([`retry`]): existence-checked, timeout-bounded unit-of-work
//!   invocation with bounded retries and configurable backoff.
//! - **Bookkeeping** ([`progress`]): locked counters with derived rate/ETA.
//!
//! Callers supply items plus [`UnitOfWork`] and [`ResultSink`] implementations
//! and receive a [`RunReport`] no matter how the run ends.

pub mod admission;
pub mod engine;
pub mod partition;
pub mod progress;
pub mod retry;
pub mod work;

pub use admission::{AdmissionController, AdmissionLimits, Denied, Lease};
pub use engine::{CancelPolicy, Engine, EngineConfig, EngineError, RunReport, RunStatus};
pub use partition::{OrderingMode, order};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use retry::{Backoff, ExecutionSettings};
pub use work::{
    Completion, Outcome, PersistOutcome, ResultSink, SinkError, UnitOfWork, WorkError, WorkItem,
};
