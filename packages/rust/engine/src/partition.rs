//! Item ordering for domain fairness.
//!
//! Round-robin interleaving guarantees that if a run is interrupted after the
//! first k items, every partition has been represented roughly equally.
//! Ordering is deterministic: groups form in first-seen order and each group
//! preserves its items' original relative order.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::work::WorkItem;

/// How the engine orders the candidate list before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingMode {
    /// Interleave one item per partition per cycle (the default).
    RoundRobin,
    /// Group by priority tier (ascending; lower value = higher priority),
    /// round-robin within each tier, then concatenate tiers.
    PriorityThenRoundRobin,
    /// Cap each partition's contribution to at most `per_partition` items.
    /// Truncates without reordering; used for bounded-cost dry runs.
    StratifiedSample { per_partition: usize },
}

/// Order `items` for dispatch according to `mode`.
pub fn order<T>(items: Vec<WorkItem<T>>, mode: OrderingMode) -> Vec<WorkItem<T>> {
    match mode {
        OrderingMode::RoundRobin => round_robin(items),
        OrderingMode::PriorityThenRoundRobin => priority_then_round_robin(items),
        OrderingMode::StratifiedSample { per_partition } => {
            stratified_sample(items, per_partition)
        }
    }
}

/// Interleave one item per partition per cycle, skipping exhausted
/// partitions, until all groups are empty.
fn round_robin<T>(items: Vec<WorkItem<T>>) -> Vec<WorkItem<T>> {
    let total = items.len();

    // Group by partition, first-seen order.
    let mut groups: Vec<(String, VecDeque<WorkItem<T>>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for item in items {
        match index.get(&item.partition) {
            Some(&i) => groups[i].1.push_back(item),
            None => {
                index.insert(item.partition.clone(), groups.len());
                groups.push((item.partition.clone(), VecDeque::from([item])));
            }
        }
    }

    let mut ordered = Vec::with_capacity(total);
    while ordered.len() < total {
        for (_, group) in groups.iter_mut() {
            if let Some(item) = group.pop_front() {
                ordered.push(item);
            }
        }
    }
    ordered
}

/// Round-robin independently within each priority tier, tiers concatenated
/// lowest value first.
fn priority_then_round_robin<T>(items: Vec<WorkItem<T>>) -> Vec<WorkItem<T>> {
    let mut tiers: BTreeMap<i64, Vec<WorkItem<T>>> = BTreeMap::new();
    for item in items {
        tiers.entry(item.priority).or_default().push(item);
    }

    tiers
        .into_values()
        .flat_map(round_robin)
        .collect()
}

/// Keep at most `per_partition` items from each partition, in original order.
fn stratified_sample<T>(items: Vec<WorkItem<T>>, per_partition: usize) -> Vec<WorkItem<T>> {
    let mut taken: HashMap<String, usize> = HashMap::new();
    items
        .into_iter()
        .filter(|item| {
            let count = taken.entry(item.partition.clone()).or_insert(0);
            if *count < per_partition {
                *count += 1;
                true
            } else {
                false
            }
        })
        .collect()
}
