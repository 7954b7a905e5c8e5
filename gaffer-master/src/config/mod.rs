//! Cluster configuration loading and management.
//!
//! The expected YAML structure is:
//! ```yaml
//! nodes:
//!   crunch01:
//!     capacity: 2
//!     description: "rack 1, spinning disks"
//!   crunch02:
//!     capacity: 8
//! ```
//!
//! A node's `capacity` is the number of workers it may run concurrently.
//! The parsed node set feeds [`Scheduler::update_config`]; the scheduler,
//! not this module, decides how a reload interacts with running workers.
//!
//! [`Scheduler::update_config`]: crate::scheduler::Scheduler::update_config

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// Kept private; callers work with [`NodeSpec`] / [`ClusterConfig`] instead.
#[derive(Debug, Deserialize)]
struct ClusterFile {
    nodes: BTreeMap<String, NodeEntry>,
}

/// Per-node fields as they appear in the YAML file.
#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(default = "default_capacity")]
    capacity: u32,
    description: Option<String>,
}

/// Serde default for `capacity`: one worker at a time.
fn default_capacity() -> u32 {
    1
}

// ── Public data structures ────────────────────────────────────────────────────

/// One configured compute node: the unit handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    /// Maximum number of concurrent workers on this node.
    pub capacity: u32,
}

/// Loads and manages the cluster node set from a YAML file.
#[derive(Debug, Default)]
pub struct ClusterConfig {
    /// Map of node name → [`NodeSpec`], in name order.
    nodes: BTreeMap<String, NodeSpec>,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl ClusterConfig {
    /// Creates a new, empty `ClusterConfig`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and populates the internal node map.
    ///
    /// Calling this method a second time replaces all previously loaded
    /// nodes. An empty `nodes:` section is accepted; tasks submitted against
    /// an empty cluster simply wait until a node is configured.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid. On error the previous contents are cleared.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("loading cluster configuration from: {}", path.display());

        // Reset state before (re-)loading
        self.nodes.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open configuration file: {}", path.display()))?;

        let file: ClusterFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML file: {}", path.display()))?;

        for (name, entry) in file.nodes {
            debug!(
                node = %name,
                capacity = entry.capacity,
                description = entry.description.as_deref().unwrap_or(""),
                "configured node"
            );
            self.nodes.insert(
                name.clone(),
                NodeSpec {
                    name,
                    capacity: entry.capacity,
                },
            );
        }

        if self.nodes.is_empty() {
            warn!("configuration contains no nodes; submitted tasks will wait");
        }

        self.loaded = true;

        info!(
            "loaded {} node(s), total capacity {}",
            self.nodes.len(),
            self.total_capacity()
        );

        Ok(())
    }

    /// Returns a reference to the [`NodeSpec`] for `name`, or `None` if no
    /// node with that name has been loaded.
    pub fn get(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.get(name)
    }

    /// The node set in name order, ready for the scheduler.
    pub fn node_specs(&self) -> Vec<NodeSpec> {
        self.nodes.values().cloned().collect()
    }

    /// Number of configured nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of all node capacities.
    pub fn total_capacity(&self) -> u64 {
        self.nodes.values().map(|n| u64::from(n.capacity)).sum()
    }

    /// Returns `true` after a successful call to [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
