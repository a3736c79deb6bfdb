//! Engine composition: a fixed worker pool draining a fairness-ordered queue
//! under admission control.
//!
//! Each worker scans the ordered queue for the first item whose partition can
//! be admitted right now. Because a partition's earliest remaining item is
//! always encountered first, per-partition dispatch order follows the
//! partitioner's output while idle partitions overtake rate-limited ones.
//!
//! A run moves `Idle -> Running -> {Completed, BudgetExhausted, Cancelled}`;
//! [`Engine::run`] consumes the engine, so a terminal state is final and the
//! instance cannot be reused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionLimits, Denied, Lease};
use crate::partition::{OrderingMode, order};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::retry::{Backoff, ExecutionSettings, execute};
use crate::work::{Outcome, PersistOutcome, ResultSink, UnitOfWork, WorkItem};

/// Fallback wait when no denial supplied a retry hint.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on any single idle wait, so cancellation and freed slots are
/// observed promptly even with long politeness intervals.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// What to do with in-flight items when the run is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Let in-flight items run to a terminal outcome, then stop.
    Drain,
    /// Drop in-flight work at its next await point; leases are released and
    /// the items stay unprocessed.
    Abandon,
}

/// Engine configuration. Validated at construction; invalid values are the
/// only fatal errors the engine produces.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the worker pool and global in-flight cap.
    pub max_global_workers: usize,
    /// In-flight cap per partition.
    pub max_per_partition: usize,
    /// Minimum interval between dispatch starts to the same partition.
    pub rate_limit_delay: Duration,
    /// Cost ceiling for the run; `None` = unlimited.
    pub budget_limit: Option<f64>,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Backoff schedule between retries.
    pub backoff: Backoff,
    /// Bound on each unit-of-work invocation.
    pub item_timeout: Duration,
    /// How the candidate list is ordered before dispatch.
    pub ordering: OrderingMode,
    /// Log a progress snapshot every N processed items; 0 disables.
    pub progress_interval: usize,
    pub cancel_policy: CancelPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_global_workers: 15,
            max_per_partition: 3,
            rate_limit_delay: Duration::from_millis(500),
            budget_limit: None,
            max_retries: 2,
            backoff: Backoff::Linear(Duration::from_secs(2)),
            item_timeout: Duration::from_secs(30),
            ordering: OrderingMode::RoundRobin,
            progress_interval: 50,
            cancel_policy: CancelPolicy::Drain,
        }
    }
}

/// Construction-time configuration error.
#[derive(Debug, thiserror::Error)]
#[error("invalid engine config: {0}")]
pub struct EngineError(String);

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// How a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// All items reached a terminal outcome.
    Completed,
    /// The budget gate closed; queued items were skipped, in-flight items
    /// were allowed to finish.
    BudgetExhausted,
    /// The caller cancelled the run.
    Cancelled,
}

/// Returned from every run regardless of how it terminated, so callers can
/// resume by re-submitting exactly the failed/unprocessed items.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub snapshot: ProgressSnapshot,
    /// Identities of items that ended in `Failed`.
    pub failed: Vec<String>,
    /// Identities of items denied admission after budget exhaustion.
    pub skipped_budget: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The batch engine. One instance runs one batch.
pub struct Engine {
    config: EngineConfig,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Build an engine whose run is cancelled by an externally-owned token
    /// (typically a child of the process-wide shutdown token).
    pub fn with_cancellation(
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Result<Self, EngineError> {
        if config.max_global_workers == 0 {
            return Err(EngineError("max_global_workers must be at least 1".into()));
        }
        if config.max_per_partition == 0 {
            return Err(EngineError("max_per_partition must be at least 1".into()));
        }
        if let OrderingMode::StratifiedSample { per_partition } = config.ordering {
            if per_partition == 0 {
                return Err(EngineError(
                    "stratified sample size must be at least 1".into(),
                ));
            }
        }

        Ok(Self { config, cancel })
    }

    /// Token that cancels this run when triggered. Grab a clone before
    /// calling [`Engine::run`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the batch to completion, budget exhaustion, or cancellation.
    pub async fn run<T, W, S>(self, items: Vec<WorkItem<T>>, work: Arc<W>, sink: Arc<S>) -> RunReport
    where
        T: Send + Sync + 'static,
        W: UnitOfWork<T> + 'static,
        S: ResultSink<W::Output> + 'static,
    {
        let ordered = order(items, self.config.ordering);
        // Stratified sampling may have truncated the list.
        let total = ordered.len();

        info!(
            total,
            workers = self.config.max_global_workers,
            max_per_partition = self.config.max_per_partition,
            rate_limit_ms = self.config.rate_limit_delay.as_millis() as u64,
            budget = ?self.config.budget_limit,
            "starting batch run"
        );

        let ctx = Arc::new(RunContext {
            queue: Mutex::new(VecDeque::from(ordered)),
            admission: AdmissionController::new(AdmissionLimits {
                max_global: self.config.max_global_workers,
                max_per_partition: self.config.max_per_partition,
                rate_limit_delay: self.config.rate_limit_delay,
                budget_limit: self.config.budget_limit,
            }),
            tracker: ProgressTracker::new(total),
            work,
            sink,
            settings: ExecutionSettings {
                max_retries: self.config.max_retries,
                backoff: self.config.backoff,
                item_timeout: self.config.item_timeout,
            },
            cancel: self.cancel.clone(),
            cancel_policy: self.config.cancel_policy,
            progress_interval: self.config.progress_interval,
            budget_exhausted: AtomicBool::new(false),
            failed: Mutex::new(Vec::new()),
            skipped_budget: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(self.config.max_global_workers);
        for worker_id in 0..self.config.max_global_workers {
            let ctx = Arc::clone(&ctx);
            handles.push(tokio::spawn(worker_loop(ctx, worker_id)));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task aborted");
            }
        }

        let snapshot = ctx.tracker.snapshot();
        let status = if self.cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if ctx.budget_exhausted.load(Ordering::SeqCst) {
            RunStatus::BudgetExhausted
        } else {
            RunStatus::Completed
        };

        let failed = std::mem::take(&mut *ctx.failed.lock().expect("failed lock"));
        let skipped_budget =
            std::mem::take(&mut *ctx.skipped_budget.lock().expect("skipped lock"));

        info!(
            ?status,
            processed = snapshot.processed,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            skipped_existing = snapshot.skipped_existing,
            skipped_budget = snapshot.skipped_budget,
            duplicate_writes = snapshot.duplicate_writes,
            total_cost = snapshot.total_cost,
            elapsed_ms = snapshot.elapsed.as_millis() as u64,
            "batch run finished"
        );

        RunReport {
            status,
            snapshot,
            failed,
            skipped_budget,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker internals
// ---------------------------------------------------------------------------

/// State shared by all workers of one run.
struct RunContext<T, W, S>
where
    W: UnitOfWork<T>,
    S: ResultSink<W::Output>,
{
    queue: Mutex<VecDeque<WorkItem<T>>>,
    admission: AdmissionController,
    tracker: ProgressTracker,
    work: Arc<W>,
    sink: Arc<S>,
    settings: ExecutionSettings,
    cancel: CancellationToken,
    cancel_policy: CancelPolicy,
    progress_interval: usize,
    budget_exhausted: AtomicBool,
    failed: Mutex<Vec<String>>,
    skipped_budget: Mutex<Vec<String>>,
}

/// Result of one attempt to pull admissible work off the queue.
enum Grab<T> {
    /// An item plus the lease that admitted it.
    Acquired(WorkItem<T>, Lease),
    /// Nothing admissible right now; wait roughly this long and rescan.
    Wait(Duration),
    /// Queue drained; the worker can exit.
    Empty,
}

impl<T, W, S> RunContext<T, W, S>
where
    T: Send + 'static,
    W: UnitOfWork<T>,
    S: ResultSink<W::Output>,
{
    /// Scan the queue front-to-back for the first admissible item.
    ///
    /// Taking the first admissible item preserves per-partition dispatch
    /// order: a partition's earliest remaining item is always reached before
    /// its later ones.
    fn grab_next(&self) -> Grab<T> {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if queue.is_empty() {
            return Grab::Empty;
        }

        let mut hint: Option<Duration> = None;
        let mut idx = 0;
        while idx < queue.len() {
            let partition = queue[idx].partition.clone();
            match self.admission.try_admit(&partition) {
                Ok(lease) => {
                    let item = queue.remove(idx).expect("scanned index in bounds");
                    return Grab::Acquired(item, lease);
                }
                Err(Denied::BudgetExhausted) => {
                    // Terminal for the run: everything still queued is
                    // skipped; in-flight work finishes on its own.
                    self.budget_exhausted.store(true, Ordering::SeqCst);
                    let mut skipped = self.skipped_budget.lock().expect("skipped lock");
                    while let Some(item) = queue.pop_front() {
                        self.tracker.record(&Outcome::SkippedBudgetExceeded);
                        skipped.push(item.id);
                    }
                    return Grab::Empty;
                }
                Err(Denied::GlobalFull) => {
                    // No item can be admitted until a slot frees.
                    return Grab::Wait(hint.unwrap_or(POLL_INTERVAL));
                }
                Err(Denied::RateLimited { retry_after }) => {
                    hint = Some(hint.map_or(retry_after, |h| h.min(retry_after)));
                    idx += 1;
                }
                Err(Denied::PartitionFull) => idx += 1,
            }
        }

        Grab::Wait(hint.unwrap_or(POLL_INTERVAL))
    }

    /// Run one admitted item to its outcome and record the bookkeeping.
    async fn process(&self, item: WorkItem<T>, lease: Lease) {
        let outcome = match self.cancel_policy {
            CancelPolicy::Drain => {
                Some(execute(&item, self.work.as_ref(), self.sink.as_ref(), &self.settings).await)
            }
            CancelPolicy::Abandon => {
                tokio::select! {
                    outcome = execute(&item, self.work.as_ref(), self.sink.as_ref(), &self.settings) => {
                        Some(outcome)
                    }
                    _ = self.cancel.cancelled() => None,
                }
            }
        };

        let Some(outcome) = outcome else {
            debug!(item = %item.id, "abandoned on cancellation");
            drop(lease);
            return;
        };

        match &outcome {
            Outcome::Success { cost, persist, .. } => {
                // Cost lands in the admission counter before the slot frees,
                // so the next admission decision sees it.
                self.admission.record_cost(*cost);
                if *persist == PersistOutcome::Duplicate {
                    warn!(item = %item.id, "duplicate write: concurrent attempt persisted first");
                }
            }
            Outcome::Failed { error, attempts } => {
                warn!(item = %item.id, attempts = *attempts, error = %error, "item failed");
                self.failed
                    .lock()
                    .expect("failed lock")
                    .push(item.id.clone());
            }
            Outcome::SkippedAlreadyDone | Outcome::SkippedBudgetExceeded => {}
        }

        let processed = self.tracker.record(&outcome);
        drop(lease);

        if self.progress_interval != 0 && processed % self.progress_interval == 0 {
            let snap = self.tracker.snapshot();
            info!(
                processed = snap.processed,
                total = snap.total,
                succeeded = snap.succeeded,
                failed = snap.failed,
                total_cost = snap.total_cost,
                rate_per_sec = ?snap.rate_per_sec,
                eta = ?snap.eta,
                "progress"
            );
        }
    }
}

/// One worker: pull admissible items until the queue drains, the budget
/// closes, or the run is cancelled.
async fn worker_loop<T, W, S>(ctx: Arc<RunContext<T, W, S>>, worker_id: usize)
where
    T: Send + Sync + 'static,
    W: UnitOfWork<T>,
    S: ResultSink<W::Output>,
{
    debug!(worker_id, "worker started");
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        match ctx.grab_next() {
            Grab::Empty => break,
            Grab::Wait(wait) => {
                let wait = wait.min(MAX_IDLE_WAIT);
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = ctx.admission.slot_freed() => {}
                    _ = sleep(wait) => {}
                }
            }
            Grab::Acquired(item, lease) => ctx.process(item, lease).await,
        }
    }
    debug!(worker_id, "worker finished");
}
