//! Thread-safe run bookkeeping: counters, cost, rate, and ETA.
//!
//! Counters are the source of truth; [`ProgressSnapshot`] is derived on
//! demand and never written back. The single lock is held only for O(1)
//! updates.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::work::{Outcome, PersistOutcome};

#[derive(Debug, Default, Clone)]
struct Counters {
    processed: usize,
    succeeded: usize,
    failed: usize,
    skipped_existing: usize,
    skipped_budget: usize,
    duplicate_writes: usize,
    total_cost: f64,
    total_tokens: u64,
}

/// Mutable progress state shared by all workers of one run.
pub struct ProgressTracker {
    started: Instant,
    total: usize,
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record one terminal outcome. Returns the processed count after the
    /// update, for periodic progress logging.
    pub fn record(&self, outcome: &Outcome) -> usize {
        let mut c = self.counters.lock().expect("progress lock poisoned");
        c.processed += 1;

        match outcome {
            Outcome::Success {
                cost,
                tokens,
                persist,
                ..
            } => {
                c.succeeded += 1;
                c.total_cost += cost;
                c.total_tokens += tokens;
                if *persist == PersistOutcome::Duplicate {
                    c.duplicate_writes += 1;
                }
            }
            Outcome::SkippedAlreadyDone => c.skipped_existing += 1,
            Outcome::SkippedBudgetExceeded => c.skipped_budget += 1,
            Outcome::Failed { .. } => c.failed += 1,
        }

        c.processed
    }

    /// Derive a point-in-time snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = self.counters.lock().expect("progress lock poisoned").clone();
        let elapsed = self.started.elapsed();

        let rate_per_sec = if elapsed.as_secs_f64() > 0.0 && c.processed > 0 {
            Some(c.processed as f64 / elapsed.as_secs_f64())
        } else {
            None
        };

        let eta = rate_per_sec.and_then(|rate| {
            if rate > 0.0 {
                let remaining = self.total.saturating_sub(c.processed) as f64;
                Some(Duration::from_secs_f64(remaining / rate))
            } else {
                None
            }
        });

        ProgressSnapshot {
            processed: c.processed,
            succeeded: c.succeeded,
            failed: c.failed,
            skipped_existing: c.skipped_existing,
            skipped_budget: c.skipped_budget,
            duplicate_writes: c.duplicate_writes,
            total: self.total,
            total_cost: c.total_cost,
            total_tokens: c.total_tokens,
            elapsed,
            rate_per_sec,
            eta,
        }
    }
}

/// Derived, read-only view of a run's progress.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_existing: usize,
    pub skipped_budget: usize,
    /// Persist calls that found a row already written by a concurrent
    /// attempt (the tolerated check-then-insert race).
    pub duplicate_writes: usize,
    pub total: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub elapsed: Duration,
    /// Items per second; `None` until at least one item has been processed
    /// and measurable time has elapsed.
    pub rate_per_sec: Option<f64>,
    /// Estimated time to completion; `None` when the rate is undefined.
    pub eta: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(cost: f64, tokens: u64) -> Outcome {
        Outcome::Success {
            cost,
            tokens,
            attempts: 1,
            persist: PersistOutcome::Inserted,
        }
    }

    #[tokio::test]
    async fn counters_accumulate() {
        let tracker = ProgressTracker::new(4);

        tracker.record(&success(0.5, 200));
        tracker.record(&success(0.25, 100));
        tracker.record(&Outcome::SkippedAlreadyDone);
        tracker.record(&Outcome::Failed {
            error: "boom".into(),
            attempts: 3,
        });

        let snap = tracker.snapshot();
        assert_eq!(snap.processed, 4);
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped_existing, 1);
        assert_eq!(snap.total_cost, 0.75);
        assert_eq!(snap.total_tokens, 300);
    }

    #[tokio::test]
    async fn duplicate_writes_are_counted() {
        let tracker = ProgressTracker::new(2);
        tracker.record(&Outcome::Success {
            cost: 0.0,
            tokens: 0,
            attempts: 1,
            persist: PersistOutcome::Duplicate,
        });
        assert_eq!(tracker.snapshot().duplicate_writes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_undefined_before_any_progress() {
        let tracker = ProgressTracker::new(10);
        let snap = tracker.snapshot();
        assert!(snap.rate_per_sec.is_none());
        assert!(snap.eta.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_and_eta_derived() {
        let tracker = ProgressTracker::new(10);
        tokio::time::sleep(Duration::from_secs(2)).await;

        tracker.record(&success(0.0, 0));
        tracker.record(&success(0.0, 0));

        let snap = tracker.snapshot();
        let rate = snap.rate_per_sec.expect("rate defined");
        assert!((rate - 1.0).abs() < 0.01, "rate was {rate}");
        let eta = snap.eta.expect("eta defined");
        assert!((eta.as_secs_f64() - 8.0).abs() < 0.1, "eta was {eta:?}");
    }

    #[tokio::test]
    async fn record_returns_processed_count() {
        let tracker = ProgressTracker::new(3);
        assert_eq!(tracker.record(&success(0.0, 0)), 1);
        assert_eq!(tracker.record(&success(0.0, 0)), 2);
    }
}
