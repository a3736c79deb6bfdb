//! Single-item execution: existence check, bounded retries with backoff,
//! per-attempt timeout, and persistence.
//!
//! The existence check runs at the start of every attempt, not just the
//! first. A unit of work that succeeded remotely but failed to persist is
//! retried safely because the next attempt re-checks the sink before calling
//! out again.

use std::time::Duration;

use tracing::{debug, warn};

use crate::work::{Outcome, ResultSink, UnitOfWork, WorkError, WorkItem};

/// Backoff schedule between transient-failure retries.
#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    /// `base * (attempt + 1)` after the attempt numbered `attempt` (0-based).
    Linear(Duration),
    /// `base * 2^attempt`.
    Exponential(Duration),
}

impl Backoff {
    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Linear(base) => base.saturating_mul(attempt + 1),
            Self::Exponential(base) => base.saturating_mul(1u32 << attempt.min(31)),
        }
    }
}

/// Per-item execution settings.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Retries after the first attempt; an item is dispatched at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Bound on each unit-of-work invocation; a timeout is a transient
    /// failure.
    pub item_timeout: Duration,
}

/// Run one item to a terminal [`Outcome`].
pub async fn execute<T, W, S>(
    item: &WorkItem<T>,
    work: &W,
    sink: &S,
    settings: &ExecutionSettings,
) -> Outcome
where
    W: UnitOfWork<T>,
    S: ResultSink<W::Output>,
{
    let mut attempt: u32 = 0;

    loop {
        // Re-checked every attempt; guards the persist step of a previous
        // attempt that died between write and acknowledgement.
        match sink.exists(&item.id).await {
            Ok(true) => {
                debug!(item = %item.id, "already persisted, skipping");
                return Outcome::SkippedAlreadyDone;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(item = %item.id, error = %e, "existence check failed");
                if let Some(outcome) = transient_or_retry(item, &mut attempt, settings, e.0).await {
                    return outcome;
                }
                continue;
            }
        }

        let result = tokio::time::timeout(settings.item_timeout, work.run(item)).await;

        let failure = match result {
            Ok(Ok(completion)) => match sink.persist(&item.id, &completion.output).await {
                Ok(persist) => {
                    return Outcome::Success {
                        cost: completion.cost,
                        tokens: completion.tokens,
                        attempts: attempt + 1,
                        persist,
                    };
                }
                Err(e) => format!("persist failed: {e}"),
            },
            Ok(Err(WorkError::Permanent(msg))) => {
                debug!(item = %item.id, error = %msg, "permanent failure");
                return Outcome::Failed {
                    error: msg,
                    attempts: attempt + 1,
                };
            }
            Ok(Err(WorkError::Transient(msg))) => msg,
            Err(_) => format!("timed out after {:?}", settings.item_timeout),
        };

        if let Some(outcome) = transient_or_retry(item, &mut attempt, settings, failure).await {
            return outcome;
        }
    }
}

/// Handle one transient failure: either give up (returning the terminal
/// outcome) or back off and bump the attempt counter.
async fn transient_or_retry<T>(
    item: &WorkItem<T>,
    attempt: &mut u32,
    settings: &ExecutionSettings,
    error: String,
) -> Option<Outcome> {
    if *attempt >= settings.max_retries {
        warn!(
            item = %item.id,
            attempts = *attempt + 1,
            error = %error,
            "retries exhausted"
        );
        return Some(Outcome::Failed {
            error,
            attempts: settings.max_retries + 1,
        });
    }

    let delay = settings.backoff.delay(*attempt);
    debug!(
        item = %item.id,
        attempt = *attempt + 1,
        ?delay,
        error = %error,
        "transient failure, backing off"
    );
    tokio::time::sleep(delay).await;
    *attempt += 1;
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::work::{Completion, PersistOutcome, SinkError};

    struct CountingWork {
        calls: AtomicU32,
        fail_first: u32,
        permanent: bool,
    }

    impl CountingWork {
        fn failing(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                permanent: false,
            }
        }
    }

    impl UnitOfWork<()> for CountingWork {
        type Output = String;

        async fn run(
            &self,
            item: &WorkItem<()>,
        ) -> Result<Completion<Self::Output>, WorkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(WorkError::permanent("content too short"));
            }
            if call < self.fail_first {
                return Err(WorkError::transient("connection reset"));
            }
            Ok(Completion {
                output: format!("result-{}", item.id),
                cost: 0.5,
                tokens: 100,
            })
        }
    }

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<String>>,
        exist: Mutex<Vec<String>>,
    }

    impl ResultSink<String> for MemorySink {
        async fn exists(&self, item_id: &str) -> Result<bool, SinkError> {
            Ok(self.exist.lock().unwrap().iter().any(|id| id == item_id))
        }

        async fn persist(&self, item_id: &str, _output: &String) -> Result<PersistOutcome, SinkError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.iter().any(|id| id == item_id) {
                return Ok(PersistOutcome::Duplicate);
            }
            rows.push(item_id.to_string());
            Ok(PersistOutcome::Inserted)
        }
    }

    fn settings(max_retries: u32) -> ExecutionSettings {
        ExecutionSettings {
            max_retries,
            backoff: Backoff::Linear(Duration::from_millis(10)),
            item_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn backoff_schedules() {
        let linear = Backoff::Linear(Duration::from_secs(2));
        assert_eq!(linear.delay(0), Duration::from_secs(2));
        assert_eq!(linear.delay(1), Duration::from_secs(4));
        assert_eq!(linear.delay(2), Duration::from_secs(6));

        let exp = Backoff::Exponential(Duration::from_secs(1));
        assert_eq!(exp.delay(0), Duration::from_secs(1));
        assert_eq!(exp.delay(1), Duration::from_secs(2));
        assert_eq!(exp.delay(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try() {
        let work = CountingWork::failing(0);
        let sink = MemorySink::default();
        let item = WorkItem::new("a-1", "a.example", ());

        let outcome = execute(&item, &work, &sink, &settings(2)).await;
        match outcome {
            Outcome::Success {
                attempts, persist, ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(persist, PersistOutcome::Inserted);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(work.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let work = CountingWork::failing(2);
        let sink = MemorySink::default();
        let item = WorkItem::new("a-1", "a.example", ());

        let outcome = execute(&item, &work, &sink, &settings(2)).await;
        match outcome {
            Outcome::Success { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(work.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_invokes_exactly_max_retries_plus_one() {
        let work = CountingWork::failing(u32::MAX);
        let sink = MemorySink::default();
        let item = WorkItem::new("a-1", "a.example", ());

        let outcome = execute(&item, &work, &sink, &settings(2)).await;
        match outcome {
            Outcome::Failed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(work.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_does_not_retry() {
        let work = CountingWork {
            calls: AtomicU32::new(0),
            fail_first: 0,
            permanent: true,
        };
        let sink = MemorySink::default();
        let item = WorkItem::new("a-1", "a.example", ());

        let outcome = execute(&item, &work, &sink, &settings(5)).await;
        match outcome {
            Outcome::Failed { attempts, error } => {
                assert_eq!(attempts, 1);
                assert!(error.contains("too short"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(work.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_existence_skips_without_invoking_work() {
        let work = CountingWork::failing(0);
        let sink = MemorySink::default();
        sink.exist.lock().unwrap().push("a-1".into());
        let item = WorkItem::new("a-1", "a.example", ());

        let outcome = execute(&item, &work, &sink, &settings(2)).await;
        assert!(matches!(outcome, Outcome::SkippedAlreadyDone));
        assert_eq!(work.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_transient() {
        struct SlowWork;
        impl UnitOfWork<()> for SlowWork {
            type Output = String;

            async fn run(
                &self,
                _item: &WorkItem<()>,
            ) -> Result<Completion<Self::Output>, WorkError> {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Completion::free("late".into()))
            }
        }

        let sink = MemorySink::default();
        let item = WorkItem::new("a-1", "a.example", ());
        let outcome = execute(
            &item,
            &SlowWork,
            &sink,
            &ExecutionSettings {
                max_retries: 1,
                backoff: Backoff::Linear(Duration::from_millis(10)),
                item_timeout: Duration::from_secs(1),
            },
        )
        .await;

        match outcome {
            Outcome::Failed { attempts, error } => {
                assert_eq!(attempts, 2);
                assert!(error.contains("timed out"));
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }
}
