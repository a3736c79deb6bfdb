//! Admission control: global and per-partition concurrency caps, politeness
//! spacing, and the budget gate.
//!
//! All counters live behind one `std::sync::Mutex` per controller, held only
//! for O(1) updates — never across an await point. Slot release is RAII: a
//! [`Lease`] returns its slots on drop, so no exit path (success, failure,
//! panic) can leak a permanently-held slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Static limits the controller enforces.
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    /// Maximum items in flight across all partitions.
    pub max_global: usize,
    /// Maximum items in flight per partition.
    pub max_per_partition: usize,
    /// Minimum interval between dispatch starts to the same partition.
    pub rate_limit_delay: Duration,
    /// Cost ceiling; admission stops once cumulative cost reaches it.
    /// `None` means unlimited.
    pub budget_limit: Option<f64>,
}

/// Why an admission attempt was denied.
///
/// `BudgetExhausted` is terminal for the run; the other variants are
/// transient and clear once a slot frees or the politeness interval elapses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Denied {
    GlobalFull,
    PartitionFull,
    RateLimited { retry_after: Duration },
    BudgetExhausted,
}

#[derive(Debug, Default)]
struct PartitionState {
    in_flight: usize,
    last_dispatch: Option<Instant>,
}

#[derive(Debug, Default)]
struct AdmissionState {
    global_in_flight: usize,
    cumulative_cost: f64,
    partitions: HashMap<String, PartitionState>,
}

/// Gatekeeper for dispatching work items.
pub struct AdmissionController {
    limits: AdmissionLimits,
    state: Arc<Mutex<AdmissionState>>,
    freed: Arc<Notify>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits,
            state: Arc::new(Mutex::new(AdmissionState::default())),
            freed: Arc::new(Notify::new()),
        }
    }

    /// Try to admit one item for `partition`. On success the returned
    /// [`Lease`] holds a global and a partition slot until dropped.
    pub fn try_admit(&self, partition: &str) -> Result<Lease, Denied> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("admission lock poisoned");

        if let Some(budget) = self.limits.budget_limit {
            if state.cumulative_cost >= budget {
                return Err(Denied::BudgetExhausted);
            }
        }

        if state.global_in_flight >= self.limits.max_global {
            return Err(Denied::GlobalFull);
        }

        let part = state.partitions.entry(partition.to_string()).or_default();

        if part.in_flight >= self.limits.max_per_partition {
            return Err(Denied::PartitionFull);
        }

        if let Some(last) = part.last_dispatch {
            let elapsed = now.duration_since(last);
            if elapsed < self.limits.rate_limit_delay {
                return Err(Denied::RateLimited {
                    retry_after: self.limits.rate_limit_delay - elapsed,
                });
            }
        }

        part.in_flight += 1;
        part.last_dispatch = Some(now);
        state.global_in_flight += 1;

        Ok(Lease {
            state: Arc::clone(&self.state),
            freed: Arc::clone(&self.freed),
            partition: partition.to_string(),
            released: false,
        })
    }

    /// Record the cost of a successfully completed item.
    pub fn record_cost(&self, cost: f64) {
        let mut state = self.state.lock().expect("admission lock poisoned");
        state.cumulative_cost += cost;
    }

    /// Total cost recorded so far.
    pub fn cumulative_cost(&self) -> f64 {
        self.state
            .lock()
            .expect("admission lock poisoned")
            .cumulative_cost
    }

    /// Wait until some lease is released. Wakes spuriously; callers re-check
    /// admission after waking.
    pub async fn slot_freed(&self) {
        self.freed.notified().await;
    }

    /// Current global in-flight count (for instrumentation and tests).
    pub fn global_in_flight(&self) -> usize {
        self.state
            .lock()
            .expect("admission lock poisoned")
            .global_in_flight
    }

    /// Current in-flight count for one partition.
    pub fn partition_in_flight(&self, partition: &str) -> usize {
        self.state
            .lock()
            .expect("admission lock poisoned")
            .partitions
            .get(partition)
            .map(|p| p.in_flight)
            .unwrap_or(0)
    }
}

/// A granted admission slot. Dropping the lease releases both the global and
/// the partition slot and wakes waiting workers.
#[derive(Debug)]
pub struct Lease {
    state: Arc<Mutex<AdmissionState>>,
    freed: Arc<Notify>,
    partition: String,
    released: bool,
}

impl Lease {
    /// Explicitly release the lease (equivalent to dropping it).
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.state.lock().expect("admission lock poisoned");
        state.global_in_flight = state.global_in_flight.saturating_sub(1);
        if let Some(part) = state.partitions.get_mut(&self.partition) {
            part.in_flight = part.in_flight.saturating_sub(1);
        }
        drop(state);

        self.freed.notify_waiters();
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> AdmissionLimits {
        AdmissionLimits {
            max_global: 3,
            max_per_partition: 2,
            rate_limit_delay: Duration::ZERO,
            budget_limit: None,
        }
    }

    #[tokio::test]
    async fn partition_cap_enforced() {
        let ctl = AdmissionController::new(limits());

        let _a = ctl.try_admit("spiegel.de").expect("first slot");
        let _b = ctl.try_admit("spiegel.de").expect("second slot");
        assert_eq!(
            ctl.try_admit("spiegel.de").unwrap_err(),
            Denied::PartitionFull
        );

        // Other partitions are unaffected.
        let _c = ctl.try_admit("dw.com").expect("other partition");
    }

    #[tokio::test]
    async fn global_cap_enforced() {
        let ctl = AdmissionController::new(limits());

        let _a = ctl.try_admit("a.example").unwrap();
        let _b = ctl.try_admit("b.example").unwrap();
        let _c = ctl.try_admit("c.example").unwrap();
        assert_eq!(ctl.try_admit("d.example").unwrap_err(), Denied::GlobalFull);
    }

    #[tokio::test]
    async fn release_frees_slots() {
        let ctl = AdmissionController::new(AdmissionLimits {
            max_global: 1,
            max_per_partition: 1,
            rate_limit_delay: Duration::ZERO,
            budget_limit: None,
        });

        let lease = ctl.try_admit("a.example").unwrap();
        assert_eq!(ctl.global_in_flight(), 1);
        assert_eq!(ctl.try_admit("b.example").unwrap_err(), Denied::GlobalFull);

        lease.release();
        assert_eq!(ctl.global_in_flight(), 0);
        let _again = ctl.try_admit("b.example").expect("slot freed");
    }

    #[tokio::test]
    async fn drop_releases_like_explicit_release() {
        let ctl = AdmissionController::new(limits());
        {
            let _lease = ctl.try_admit("a.example").unwrap();
            assert_eq!(ctl.partition_in_flight("a.example"), 1);
        }
        assert_eq!(ctl.partition_in_flight("a.example"), 0);
        assert_eq!(ctl.global_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spacing() {
        let ctl = AdmissionController::new(AdmissionLimits {
            max_global: 10,
            max_per_partition: 10,
            rate_limit_delay: Duration::from_millis(500),
            budget_limit: None,
        });

        let first = ctl.try_admit("a.example").unwrap();
        first.release();

        // Slot is free, but the politeness interval has not elapsed.
        match ctl.try_admit("a.example").unwrap_err() {
            Denied::RateLimited { retry_after } => {
                assert!(retry_after <= Duration::from_millis(500));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        let _second = ctl.try_admit("a.example").expect("interval elapsed");
    }

    #[tokio::test]
    async fn budget_denial_is_reported() {
        let ctl = AdmissionController::new(AdmissionLimits {
            max_global: 10,
            max_per_partition: 10,
            rate_limit_delay: Duration::ZERO,
            budget_limit: Some(10.0),
        });

        ctl.record_cost(6.0);
        let lease = ctl.try_admit("a.example").expect("under budget");
        lease.release();

        ctl.record_cost(4.0);
        assert_eq!(
            ctl.try_admit("a.example").unwrap_err(),
            Denied::BudgetExhausted
        );
        assert_eq!(ctl.cumulative_cost(), 10.0);
    }
}
