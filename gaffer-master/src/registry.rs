//! In-memory bookkeeping tables for the master scheduler.
//!
//! All tables live in one [`Registry`] owned by the scheduler core, so no
//! locking is needed: every mutation happens inside the core's serialized
//! command loop. The tables are not persistent; a restarted master rebuilds
//! them from configuration.
//!
//! `BTreeMap`/`BTreeSet` (not `HashMap`) for everything keyed by node name,
//! so iteration order is always the node-name collation order. Node
//! selection ties break on that order and must be reproducible.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::config::NodeSpec;
use crate::launch::WorkerHandle;
use crate::task::{CoordinatorHandle, TaskMode, TaskResult, WorkerId};

// ── Records ───────────────────────────────────────────────────────────────────

/// One live worker. Created at dispatch, destroyed at the termination report.
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub jobname: String,
    pub node: String,
    pub mode: TaskMode,
    pub partid: u32,
    pub reply_to: CoordinatorHandle,
    pub handle: WorkerHandle,
}

/// Per-node outcome counters. Monotonically non-decreasing for the lifetime
/// of the node entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub ok: u64,
    pub data_error: u64,
    pub crash: u64,
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Live workers, per-node load and capacity, outcome counters, and the
/// global blacklist.
///
/// Secondary indices by jobname and by node keep job-wide and node-wide
/// queries proportional to the number of matches rather than the number of
/// live workers.
#[derive(Debug, Default)]
pub struct Registry {
    workers: HashMap<WorkerId, WorkerRecord>,
    by_job: HashMap<String, BTreeSet<WorkerId>>,
    by_node: HashMap<String, BTreeSet<WorkerId>>,

    load: BTreeMap<String, u32>,
    caps: BTreeMap<String, u32>,
    stats: BTreeMap<String, NodeStats>,
    blacklist: BTreeSet<String>,
}

impl Registry {
    pub fn new(nodes: &[NodeSpec]) -> Self {
        let mut registry = Self::default();
        registry.apply_config(nodes);
        registry
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    /// Replace the configured node set.
    ///
    /// Load and counters are preserved for nodes that stay configured and
    /// initialized to zero for new ones. Rows for removed nodes survive
    /// while workers are still draining on them (their termination
    /// bookkeeping must land somewhere) and are pruned once idle.
    pub fn apply_config(&mut self, nodes: &[NodeSpec]) {
        let caps: BTreeMap<String, u32> = nodes
            .iter()
            .map(|n| (n.name.clone(), n.capacity))
            .collect();

        for name in caps.keys() {
            self.load.entry(name.clone()).or_insert(0);
            self.stats.entry(name.clone()).or_default();
        }
        self.load
            .retain(|name, load| caps.contains_key(name) || *load > 0);
        let Self { load, stats, .. } = self;
        stats.retain(|name, _| caps.contains_key(name) || load.contains_key(name));

        self.caps = caps;
    }

    /// Capacity of `node`, or `None` if it is not configured.
    pub fn capacity(&self, node: &str) -> Option<u32> {
        self.caps.get(node).copied()
    }

    /// Configured nodes with their capacities, in name order.
    pub fn configured(&self) -> impl Iterator<Item = (&str, u32)> {
        self.caps.iter().map(|(name, cap)| (name.as_str(), *cap))
    }

    pub fn configured_count(&self) -> usize {
        self.caps.len()
    }

    // ── Load accounting ───────────────────────────────────────────────────────

    pub fn load(&self, node: &str) -> u32 {
        self.load.get(node).copied().unwrap_or(0)
    }

    pub fn add_load(&mut self, node: &str) {
        *self.load.entry(node.to_string()).or_insert(0) += 1;
    }

    /// Release one load slot. Each worker termination releases exactly one;
    /// a missing entry indicates a bookkeeping bug and is only logged.
    pub fn sub_load(&mut self, node: &str) {
        match self.load.get_mut(node) {
            Some(load) if *load > 0 => *load -= 1,
            _ => warn!(node, "load decrement for a node with no load"),
        }
    }

    pub fn total_load(&self) -> u64 {
        self.load.values().map(|l| u64::from(*l)).sum()
    }

    // ── Outcome counters ──────────────────────────────────────────────────────

    /// Count one worker outcome against `node`.
    pub fn record_outcome(&mut self, node: &str, result: TaskResult) {
        let stats = self.stats.entry(node.to_string()).or_default();
        match result {
            TaskResult::Ok => stats.ok += 1,
            TaskResult::DataError => stats.data_error += 1,
            TaskResult::JobError | TaskResult::Error => stats.crash += 1,
        }
    }

    pub fn stats(&self, node: &str) -> NodeStats {
        self.stats.get(node).copied().unwrap_or_default()
    }

    // ── Worker table ──────────────────────────────────────────────────────────

    pub fn insert_worker(&mut self, record: WorkerRecord) {
        self.by_job
            .entry(record.jobname.clone())
            .or_default()
            .insert(record.id);
        self.by_node
            .entry(record.node.clone())
            .or_default()
            .insert(record.id);
        self.workers.insert(record.id, record);
    }

    /// Remove a worker and unindex it. `None` if the id is unknown, which
    /// the caller must treat as "already cleaned" rather than an error.
    pub fn remove_worker(&mut self, id: WorkerId) -> Option<WorkerRecord> {
        let record = self.workers.remove(&id)?;
        if let Some(ids) = self.by_job.get_mut(&record.jobname) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_job.remove(&record.jobname);
            }
        }
        if let Some(ids) = self.by_node.get_mut(&record.node) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_node.remove(&record.node);
            }
        }
        Some(record)
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(&id)
    }

    pub fn worker_mut(&mut self, id: WorkerId) -> Option<&mut WorkerRecord> {
        self.workers.get_mut(&id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Ids of every live worker, ascending (dispatch order).
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of the live workers of one job, ascending.
    pub fn job_workers(&self, jobname: &str) -> Vec<WorkerId> {
        self.by_job
            .get(jobname)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of the live workers on one node, ascending.
    pub fn node_workers(&self, node: &str) -> Vec<WorkerId> {
        self.by_node
            .get(node)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    // ── Blacklist ─────────────────────────────────────────────────────────────

    /// Returns `true` if the node was not blacklisted before.
    pub fn blacklist_add(&mut self, node: &str) -> bool {
        self.blacklist.insert(node.to_string())
    }

    /// Returns `true` if the node was blacklisted before.
    pub fn blacklist_remove(&mut self, node: &str) -> bool {
        self.blacklist.remove(node)
    }

    pub fn is_blacklisted(&self, node: &str) -> bool {
        self.blacklist.contains(node)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, u32)]) -> Vec<NodeSpec> {
        pairs
            .iter()
            .map(|(name, capacity)| NodeSpec {
                name: name.to_string(),
                capacity: *capacity,
            })
            .collect()
    }

    fn record(id: WorkerId, jobname: &str, node: &str, partid: u32) -> WorkerRecord {
        WorkerRecord {
            id,
            jobname: jobname.to_string(),
            node: node.to_string(),
            mode: TaskMode::Map,
            partid,
            reply_to: CoordinatorHandle::channel().0,
            handle: WorkerHandle::detached(),
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    #[test]
    fn new_registry_has_zero_load_per_configured_node() {
        let registry = Registry::new(&specs(&[("alpha", 2), ("beta", 4)]));
        assert_eq!(registry.configured_count(), 2);
        assert_eq!(registry.capacity("alpha"), Some(2));
        assert_eq!(registry.capacity("beta"), Some(4));
        assert_eq!(registry.load("alpha"), 0);
        assert_eq!(registry.total_load(), 0);
    }

    #[test]
    fn configured_iterates_in_name_order() {
        let registry = Registry::new(&specs(&[("zeta", 1), ("alpha", 1), ("mid", 1)]));
        let names: Vec<&str> = registry.configured().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn reload_preserves_load_and_counters_for_retained_nodes() {
        let mut registry = Registry::new(&specs(&[("alpha", 2)]));
        registry.add_load("alpha");
        registry.record_outcome("alpha", TaskResult::Ok);

        registry.apply_config(&specs(&[("alpha", 8), ("beta", 1)]));

        assert_eq!(registry.capacity("alpha"), Some(8));
        assert_eq!(registry.load("alpha"), 1);
        assert_eq!(registry.stats("alpha").ok, 1);
        assert_eq!(registry.load("beta"), 0);
        assert_eq!(registry.stats("beta"), NodeStats::default());
    }

    #[test]
    fn reload_keeps_rows_for_removed_nodes_until_idle() {
        let mut registry = Registry::new(&specs(&[("alpha", 1), ("beta", 1)]));
        registry.add_load("alpha");

        // alpha removed while its worker is still running
        registry.apply_config(&specs(&[("beta", 1)]));
        assert_eq!(registry.capacity("alpha"), None);
        assert_eq!(registry.load("alpha"), 1);

        // Termination bookkeeping still lands
        registry.record_outcome("alpha", TaskResult::Ok);
        registry.sub_load("alpha");
        assert_eq!(registry.load("alpha"), 0);
        assert_eq!(registry.stats("alpha").ok, 1);

        // The next reload sweeps the idle row
        registry.apply_config(&specs(&[("beta", 1)]));
        assert_eq!(registry.stats("alpha"), NodeStats::default());
    }

    // ── Load ──────────────────────────────────────────────────────────────────

    #[test]
    fn load_sums_match_worker_count_under_mixed_ops() {
        let mut registry = Registry::new(&specs(&[("alpha", 2), ("beta", 2)]));

        registry.add_load("alpha");
        registry.insert_worker(record(1, "j1", "alpha", 0));
        registry.add_load("beta");
        registry.insert_worker(record(2, "j1", "beta", 1));
        registry.add_load("alpha");
        registry.insert_worker(record(3, "j2", "alpha", 0));
        assert_eq!(registry.total_load(), registry.worker_count() as u64);

        let removed = registry.remove_worker(2).unwrap();
        registry.sub_load(&removed.node);
        assert_eq!(registry.total_load(), registry.worker_count() as u64);
        assert_eq!(registry.load("beta"), 0);
        assert_eq!(registry.load("alpha"), 2);
    }

    #[test]
    fn sub_load_without_load_is_logged_not_fatal() {
        let mut registry = Registry::new(&specs(&[("alpha", 1)]));
        registry.sub_load("alpha");
        registry.sub_load("ghost");
        assert_eq!(registry.load("alpha"), 0);
    }

    // ── Counters ──────────────────────────────────────────────────────────────

    #[test]
    fn outcome_counter_classification() {
        let mut registry = Registry::new(&specs(&[("alpha", 1)]));
        registry.record_outcome("alpha", TaskResult::Ok);
        registry.record_outcome("alpha", TaskResult::DataError);
        registry.record_outcome("alpha", TaskResult::JobError);
        registry.record_outcome("alpha", TaskResult::Error);

        let stats = registry.stats("alpha");
        assert_eq!(stats.ok, 1);
        assert_eq!(stats.data_error, 1);
        assert_eq!(stats.crash, 2);
    }

    #[test]
    fn counters_only_grow() {
        let mut registry = Registry::new(&specs(&[("alpha", 1)]));
        let mut previous = registry.stats("alpha");
        for result in [
            TaskResult::Ok,
            TaskResult::Error,
            TaskResult::Ok,
            TaskResult::DataError,
        ] {
            registry.record_outcome("alpha", result);
            let current = registry.stats("alpha");
            assert!(current.ok >= previous.ok);
            assert!(current.data_error >= previous.data_error);
            assert!(current.crash >= previous.crash);
            previous = current;
        }
    }

    // ── Worker table and indices ──────────────────────────────────────────────

    #[test]
    fn indices_answer_job_and_node_queries() {
        let mut registry = Registry::new(&specs(&[("alpha", 4), ("beta", 4)]));
        registry.insert_worker(record(1, "j1", "alpha", 0));
        registry.insert_worker(record(2, "j1", "beta", 1));
        registry.insert_worker(record(3, "j2", "alpha", 0));

        assert_eq!(registry.job_workers("j1"), vec![1, 2]);
        assert_eq!(registry.job_workers("j2"), vec![3]);
        assert!(registry.job_workers("ghost").is_empty());
        assert_eq!(registry.node_workers("alpha"), vec![1, 3]);
        assert_eq!(registry.node_workers("beta"), vec![2]);
    }

    #[test]
    fn remove_worker_unindexes() {
        let mut registry = Registry::new(&specs(&[("alpha", 4)]));
        registry.insert_worker(record(1, "j1", "alpha", 0));
        registry.insert_worker(record(2, "j1", "alpha", 1));

        let removed = registry.remove_worker(1).unwrap();
        assert_eq!(removed.partid, 0);
        assert_eq!(registry.job_workers("j1"), vec![2]);
        assert_eq!(registry.node_workers("alpha"), vec![2]);

        registry.remove_worker(2).unwrap();
        assert!(registry.job_workers("j1").is_empty());
        assert!(registry.node_workers("alpha").is_empty());
    }

    #[test]
    fn remove_unknown_worker_returns_none() {
        let mut registry = Registry::new(&specs(&[("alpha", 1)]));
        assert!(registry.remove_worker(99).is_none());
    }

    // ── Blacklist ─────────────────────────────────────────────────────────────

    #[test]
    fn blacklist_add_and_remove_report_changes() {
        let mut registry = Registry::new(&specs(&[("alpha", 1)]));

        assert!(registry.blacklist_add("alpha"));
        assert!(!registry.blacklist_add("alpha"), "second add is a no-op");
        assert!(registry.is_blacklisted("alpha"));

        assert!(registry.blacklist_remove("alpha"));
        assert!(!registry.blacklist_remove("alpha"), "second remove is a no-op");
        assert!(!registry.is_blacklisted("alpha"));
    }
}
