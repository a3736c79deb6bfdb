//! Work items, injected collaborators, and per-item outcomes.
//!
//! The engine is generic over the payload it carries, the unit of work it
//! runs, and the sink results are persisted to. Callers implement
//! [`UnitOfWork`] and [`ResultSink`]; the engine owns scheduling, admission,
//! retries, and bookkeeping.

use std::future::Future;

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// One schedulable unit handed to the engine.
///
/// `id` is the caller-defined identity used for dedup against the sink; it
/// must be stable across retries. `partition` groups items for fairness and
/// politeness (typically the source domain).
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    pub id: String,
    pub partition: String,
    /// Explicit priority tier; lower values are scheduled first under
    /// priority ordering. Ignored by the other ordering modes.
    pub priority: i64,
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(id: impl Into<String>, partition: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
            priority: 0,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

/// Item-level failure classification.
///
/// Transient failures are retried with backoff up to the configured bound;
/// permanent failures are terminal for the item immediately.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl WorkError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }
}

/// A successful unit-of-work result plus the resources it consumed.
#[derive(Debug, Clone)]
pub struct Completion<O> {
    pub output: O,
    /// Monetary (or otherwise budgeted) cost of this call. Accumulated into
    /// the run's cost counter only on success.
    pub cost: f64,
    /// Token usage, where the unit of work is a metered API call.
    pub tokens: u64,
}

impl<O> Completion<O> {
    /// A completion with no associated cost (plain fetches).
    pub fn free(output: O) -> Self {
        Self {
            output,
            cost: 0.0,
            tokens: 0,
        }
    }
}

/// The actual fetch or model invocation, supplied by each pipeline stage.
pub trait UnitOfWork<T>: Send + Sync {
    type Output: Send + Sync;

    fn run(
        &self,
        item: &WorkItem<T>,
    ) -> impl Future<Output = Result<Completion<Self::Output>, WorkError>> + Send;
}

// ---------------------------------------------------------------------------
// Result sink
// ---------------------------------------------------------------------------

/// Error from the sink; treated as a transient failure of the attempt.
#[derive(Debug, thiserror::Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Whether a persist call wrote a new row or hit an already-present one.
///
/// `Duplicate` means two concurrent attempts both passed the existence check;
/// it is tolerated, counted, and logged — never silently swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    Duplicate,
}

/// Idempotent persistence layer consulted before execution (existence check)
/// and after (write). Not assumed to be transactional across callers.
pub trait ResultSink<O>: Send + Sync {
    fn exists(&self, item_id: &str) -> impl Future<Output = Result<bool, SinkError>> + Send;

    fn persist(
        &self,
        item_id: &str,
        output: &O,
    ) -> impl Future<Output = Result<PersistOutcome, SinkError>> + Send;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal result of one work item. Immutable once produced; consumed
/// exactly once by the progress tracker.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        cost: f64,
        tokens: u64,
        attempts: u32,
        persist: PersistOutcome,
    },
    SkippedAlreadyDone,
    SkippedBudgetExceeded,
    Failed {
        error: String,
        attempts: u32,
    },
}

impl Outcome {
    /// Whether this outcome ends the item in success (including skips).
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::SkippedAlreadyDone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_builder() {
        let item = WorkItem::new("a-1", "example.com", 42u32).with_priority(1);
        assert_eq!(item.id, "a-1");
        assert_eq!(item.partition, "example.com");
        assert_eq!(item.priority, 1);
        assert_eq!(item.payload, 42);
    }

    #[test]
    fn outcome_success_classification() {
        let ok = Outcome::Success {
            cost: 0.01,
            tokens: 100,
            attempts: 1,
            persist: PersistOutcome::Inserted,
        };
        assert!(ok.is_success());
        assert!(Outcome::SkippedAlreadyDone.is_success());
        assert!(!Outcome::SkippedBudgetExceeded.is_success());
        assert!(
            !Outcome::Failed {
                error: "boom".into(),
                attempts: 3
            }
            .is_success()
        );
    }
}
