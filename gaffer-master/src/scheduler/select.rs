/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node selection for the dispatch loop.
//!
//! [`select_node`] is a pure read over the [`Registry`]; it mutates nothing
//! and is always called from inside the scheduler's serialized decision
//! path, so the load it reads cannot change before the caller acts on the
//! answer.

use crate::registry::Registry;
use crate::task::Placement;

/// Outcome of one placement decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Run the task on this node.
    Node(String),

    /// No configured node has a free worker slot. Retry after any worker
    /// terminates.
    Busy,

    /// Free slots exist, but every node holding one is excluded by the
    /// task's blacklist or the global blacklist. `tried` is the size of the
    /// task's own blacklist, `total` the number of configured nodes; the
    /// caller compares the two to tell "failed everywhere it could run"
    /// from "excluded right now, retry later".
    AllBad { tried: usize, total: usize },
}

/// Pick a node for a task with the given placement constraints.
///
/// The preferred node wins outright whenever it is configured, has a free
/// slot, and is not excluded. Otherwise the least-loaded eligible node is
/// chosen; equal loads break on node-name order, so repeated runs over the
/// same cluster state place tasks identically.
pub fn select_node(registry: &Registry, placement: &Placement) -> Selection {
    if let Some(pref) = placement.pref.as_deref() {
        if let Some(capacity) = registry.capacity(pref) {
            if registry.load(pref) < capacity
                && !placement.blacklist.contains(pref)
                && !registry.is_blacklisted(pref)
            {
                return Selection::Node(pref.to_string());
            }
        }
    }

    let mut saw_free_slot = false;
    let mut best: Option<(&str, u32)> = None;
    for (name, capacity) in registry.configured() {
        let load = registry.load(name);
        if load >= capacity {
            continue;
        }
        saw_free_slot = true;
        if placement.blacklist.contains(name) || registry.is_blacklisted(name) {
            continue;
        }
        // Iteration is in name order; the strict comparison keeps the
        // first-named node among equal loads.
        if best.map_or(true, |(_, lowest)| load < lowest) {
            best = Some((name, load));
        }
    }

    match best {
        Some((name, _)) => Selection::Node(name.to_string()),
        None if saw_free_slot => Selection::AllBad {
            tried: placement.blacklist.len(),
            total: registry.configured_count(),
        },
        None => Selection::Busy,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeSpec;

    fn registry(pairs: &[(&str, u32)]) -> Registry {
        let specs: Vec<NodeSpec> = pairs
            .iter()
            .map(|(name, capacity)| NodeSpec {
                name: name.to_string(),
                capacity: *capacity,
            })
            .collect();
        Registry::new(&specs)
    }

    // ── Fast path ─────────────────────────────────────────────────────────────

    #[test]
    fn preferred_node_wins_when_free() {
        let registry = registry(&[("alpha", 2), ("beta", 2)]);
        let selection = select_node(&registry, &Placement::on("beta"));
        assert_eq!(selection, Selection::Node("beta".into()));
    }

    #[test]
    fn preferred_node_at_capacity_falls_back_to_least_loaded() {
        let mut registry = registry(&[("alpha", 1), ("beta", 1)]);
        registry.add_load("alpha");
        let selection = select_node(&registry, &Placement::on("alpha"));
        assert_eq!(selection, Selection::Node("beta".into()));
    }

    #[test]
    fn unconfigured_preferred_node_is_ignored() {
        let registry = registry(&[("alpha", 1)]);
        let selection = select_node(&registry, &Placement::on("ghost"));
        assert_eq!(selection, Selection::Node("alpha".into()));
    }

    #[test]
    fn blacklisted_preferred_node_is_skipped() {
        let mut registry = registry(&[("alpha", 1), ("beta", 1)]);
        registry.blacklist_add("alpha");
        let selection = select_node(&registry, &Placement::on("alpha"));
        assert_eq!(selection, Selection::Node("beta".into()));
    }

    #[test]
    fn task_blacklist_beats_preference() {
        let registry = registry(&[("alpha", 1), ("beta", 1)]);
        let selection = select_node(&registry, &Placement::on("alpha").excluding(["alpha"]));
        assert_eq!(selection, Selection::Node("beta".into()));
    }

    // ── Least-loaded fallback ─────────────────────────────────────────────────

    #[test]
    fn least_loaded_node_is_chosen() {
        let mut registry = registry(&[("alpha", 4), ("beta", 4)]);
        registry.add_load("alpha");
        registry.add_load("alpha");
        registry.add_load("beta");
        let selection = select_node(&registry, &Placement::anywhere());
        assert_eq!(selection, Selection::Node("beta".into()));
    }

    #[test]
    fn equal_loads_break_on_node_name_order() {
        let registry = registry(&[("zeta", 2), ("alpha", 2), ("mid", 2)]);
        let selection = select_node(&registry, &Placement::anywhere());
        assert_eq!(selection, Selection::Node("alpha".into()));
    }

    #[test]
    fn selection_is_read_only() {
        let registry = registry(&[("alpha", 2)]);
        select_node(&registry, &Placement::anywhere());
        select_node(&registry, &Placement::anywhere());
        assert_eq!(registry.load("alpha"), 0);
    }

    // ── Busy ──────────────────────────────────────────────────────────────────

    #[test]
    fn full_cluster_is_busy() {
        let mut registry = registry(&[("alpha", 1), ("beta", 1)]);
        registry.add_load("alpha");
        registry.add_load("beta");
        assert_eq!(select_node(&registry, &Placement::anywhere()), Selection::Busy);
    }

    #[test]
    fn empty_configuration_is_busy() {
        let registry = registry(&[]);
        assert_eq!(select_node(&registry, &Placement::anywhere()), Selection::Busy);
    }

    #[test]
    fn zero_capacity_nodes_never_take_tasks() {
        let registry = registry(&[("alpha", 0)]);
        assert_eq!(select_node(&registry, &Placement::on("alpha")), Selection::Busy);
    }

    // ── AllBad shapes ─────────────────────────────────────────────────────────

    #[test]
    fn full_task_blacklist_is_terminal_all_bad() {
        let registry = registry(&[("alpha", 1), ("beta", 1)]);
        let placement = Placement::anywhere().excluding(["alpha", "beta"]);
        assert_eq!(
            select_node(&registry, &placement),
            Selection::AllBad { tried: 2, total: 2 }
        );
    }

    #[test]
    fn global_blacklist_produces_retryable_all_bad() {
        let mut registry = registry(&[("alpha", 1), ("beta", 1)]);
        registry.blacklist_add("alpha");
        let placement = Placement::anywhere().excluding(["beta"]);
        // One node failed the task, the other is only administratively out
        assert_eq!(
            select_node(&registry, &placement),
            Selection::AllBad { tried: 1, total: 2 }
        );
    }

    #[test]
    fn stale_blacklist_entries_can_exceed_the_configured_count() {
        // Blacklist entries for nodes that have since left the
        // configuration still count towards `tried`, so `tried` can exceed
        // `total` without the remaining nodes having failed the task.
        let mut registry = registry(&[("alpha", 1)]);
        registry.blacklist_add("alpha");
        let placement = Placement::anywhere().excluding(["beta", "gamma"]);
        assert_eq!(
            select_node(&registry, &placement),
            Selection::AllBad { tried: 2, total: 1 }
        );
    }

    #[test]
    fn busy_nodes_do_not_mask_all_bad() {
        // beta full, alpha excluded: a slot exists but nothing is eligible
        let mut registry = registry(&[("alpha", 1), ("beta", 1)]);
        registry.add_load("beta");
        let placement = Placement::anywhere().excluding(["alpha"]);
        assert_eq!(
            select_node(&registry, &placement),
            Selection::AllBad { tried: 1, total: 2 }
        );
    }
}
