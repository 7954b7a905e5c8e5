//! The scheduling core: waitlist, dispatch, worker lifecycle.
//!
//! [`Scheduler`] is the single authority over the cluster's
//! [`Registry`]. All state lives inside one spawned task that drains a
//! command queue; every operation, a worker termination included, is one
//! message processed to completion before the next. Node selection reads
//! load and the dispatch that follows increments it, so that read-then-write
//! must never interleave with anything else. The queue gives that for free,
//! without a lock.
//!
//! Dispatch walks the waitlist head by head:
//!
//! | [`select_node`] says | the loop does |
//! |---|---|
//! | `Node(n)` | pop the head, claim a slot on `n`, launch, keep going |
//! | `Busy` | stop; a terminating worker will poke the loop again |
//! | `AllBad`, every node failed | pop the head, tell the coordinator, keep going |
//! | `AllBad`, some only excluded | stop; a whitelist or reload may free it |
//!
//! The waitlist is strictly FIFO. A head that cannot be placed blocks
//! everything behind it; that is deliberate, and shaping workloads so a
//! stuck head does not starve the queue is the coordinators' business.

pub mod error;
pub mod select;

pub use error::SchedulerError;
pub use select::{select_node, Selection};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::NodeSpec;
use crate::events::EventSink;
use crate::launch::{Completion, WorkerLauncher, WorkerSpec};
use crate::registry::{Registry, WorkerRecord};
use crate::task::{JobUpdate, Task, TaskMode, WorkerId};

/// Message delivered to a coordinator when a task has failed on every node
/// it could run on.
pub const ALL_NODES_FAILED: &str = "Job failed on all available nodes";

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// What one job is currently doing: parallel vectors of node and partition,
/// one entry per running worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobActivity {
    pub nodes: Vec<String>,
    pub partids: Vec<u32>,
}

/// One row of per-node status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub capacity: u32,
    pub load: u32,
    pub ok: u64,
    pub data_error: u64,
    pub error: u64,
    pub blacklisted: bool,
}

/// One running worker, as seen by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWorker {
    pub jobname: String,
    pub node: String,
    pub mode: TaskMode,
    pub partid: u32,
}

/// Whole-cluster snapshot: a row per configured node plus every running
/// worker.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub nodes: Vec<NodeInfo>,
    pub active: Vec<ActiveWorker>,
}

/// Single-node snapshot.
#[derive(Debug, Clone)]
pub struct NodeDetail {
    pub stats: NodeInfo,
    pub active: Vec<ActiveWorker>,
}

// ── Commands ──────────────────────────────────────────────────────────────────

enum Command {
    Submit(Box<Task>),
    KillJob {
        jobname: String,
        ack: oneshot::Sender<()>,
    },
    CleanJob {
        jobname: String,
        ack: oneshot::Sender<()>,
    },
    Blacklist {
        node: String,
        ack: oneshot::Sender<()>,
    },
    Whitelist {
        node: String,
        ack: oneshot::Sender<()>,
    },
    UpdateConfig {
        nodes: Vec<NodeSpec>,
        ack: oneshot::Sender<()>,
    },
    GetActive {
        jobname: String,
        reply: oneshot::Sender<JobActivity>,
    },
    GetClusterInfo {
        reply: oneshot::Sender<ClusterInfo>,
    },
    GetNodeInfo {
        node: String,
        reply: oneshot::Sender<Result<NodeDetail, SchedulerError>>,
    },
    WorkerDone(Completion),
}

/// Channel a launched worker uses to report its termination.
///
/// Hands the report into the same queue as every other command, so a
/// termination is serialized against scheduling decisions exactly like a
/// coordinator request. Delivery is best-effort; a master that has already
/// stopped has no bookkeeping left to do.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CompletionSender {
    pub fn send(&self, completion: Completion) {
        let _ = self.tx.send(Command::WorkerDone(completion));
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// Clonable handle to the scheduler core.
///
/// The core runs until every handle is dropped and every launched worker has
/// reported; queries and mutations after that fail with
/// [`SchedulerError::Stopped`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    cmd: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Start a scheduler core for the given node set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        nodes: Vec<NodeSpec>,
        launcher: Arc<dyn WorkerLauncher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core {
            registry: Registry::new(&nodes),
            waitlist: VecDeque::new(),
            launcher,
            events,
            next_worker_id: 1,
            completions: tx.downgrade(),
        };
        tokio::spawn(core.run(rx));
        Self { cmd: tx }
    }

    /// Admit a task.
    ///
    /// Returns as soon as the task is queued, whatever the cluster looks
    /// like; dispatch happens asynchronously. Coordinators submit partitions
    /// back-to-back and must not pay for the cluster being momentarily full.
    pub fn submit(&self, task: Task) -> Result<(), SchedulerError> {
        self.cmd
            .send(Command::Submit(Box::new(task)))
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Kill every running worker of a job and drop its waiting tasks.
    ///
    /// Acks once the kill requests are sent and the waitlist is filtered.
    /// The workers' termination notifications still arrive afterwards
    /// through the normal outcome path.
    pub async fn kill_job(&self, jobname: &str) -> Result<(), SchedulerError> {
        let jobname = jobname.to_string();
        self.request(|ack| Command::KillJob { jobname, ack }).await
    }

    /// [`kill_job`](Self::kill_job), then drop the job's event log.
    pub async fn clean_job(&self, jobname: &str) -> Result<(), SchedulerError> {
        let jobname = jobname.to_string();
        self.request(|ack| Command::CleanJob { jobname, ack }).await
    }

    /// Administratively exclude a node from selection.
    pub async fn blacklist(&self, node: &str) -> Result<(), SchedulerError> {
        let node = node.to_string();
        self.request(|ack| Command::Blacklist { node, ack }).await
    }

    /// Lift a node's administrative exclusion.
    pub async fn whitelist(&self, node: &str) -> Result<(), SchedulerError> {
        let node = node.to_string();
        self.request(|ack| Command::Whitelist { node, ack }).await
    }

    /// Replace the configured node set. Load and counters of retained nodes
    /// are preserved; see [`Registry::apply_config`].
    pub async fn update_config(&self, nodes: Vec<NodeSpec>) -> Result<(), SchedulerError> {
        self.request(|ack| Command::UpdateConfig { nodes, ack })
            .await
    }

    /// Nodes and partitions a job is currently running on.
    pub async fn get_active(&self, jobname: &str) -> Result<JobActivity, SchedulerError> {
        let jobname = jobname.to_string();
        self.request(|reply| Command::GetActive { jobname, reply })
            .await
    }

    /// Status of every configured node plus all running workers.
    pub async fn cluster_info(&self) -> Result<ClusterInfo, SchedulerError> {
        self.request(|reply| Command::GetClusterInfo { reply }).await
    }

    /// Status of one configured node and the workers running on it.
    pub async fn node_info(&self, node: &str) -> Result<NodeDetail, SchedulerError> {
        let node = node.to_string();
        self.request(|reply| Command::GetNodeInfo { node, reply })
            .await?
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd
            .send(make(tx))
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }
}

// ── Core ──────────────────────────────────────────────────────────────────────

struct Core {
    registry: Registry,
    waitlist: VecDeque<Task>,
    launcher: Arc<dyn WorkerLauncher>,
    events: Arc<dyn EventSink>,
    next_worker_id: WorkerId,
    /// Weak so that live workers keep the queue open but the core itself
    /// does not; the loop ends once handles and workers are all gone.
    completions: mpsc::WeakUnboundedSender<Command>,
}

impl Core {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(
            nodes = self.registry.configured_count(),
            "master scheduler running"
        );
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        info!("master scheduler stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(task) => self.admit(*task),
            Command::KillJob { jobname, ack } => {
                self.kill_job(&jobname);
                let _ = ack.send(());
            }
            Command::CleanJob { jobname, ack } => {
                self.kill_job(&jobname);
                self.events.drop_job(&jobname);
                let _ = ack.send(());
            }
            Command::Blacklist { node, ack } => {
                if self.registry.blacklist_add(&node) {
                    info!(node = %node, "node blacklisted");
                    self.events.master_event(&format!("node {node} blacklisted"));
                }
                let _ = ack.send(());
            }
            Command::Whitelist { node, ack } => {
                if self.registry.blacklist_remove(&node) {
                    info!(node = %node, "node whitelisted");
                    self.events.master_event(&format!("node {node} whitelisted"));
                }
                let _ = ack.send(());
                self.schedule();
            }
            Command::UpdateConfig { nodes, ack } => {
                self.registry.apply_config(&nodes);
                info!(nodes = nodes.len(), "cluster configuration applied");
                self.events
                    .master_event(&format!("configuration reloaded: {} node(s)", nodes.len()));
                let _ = ack.send(());
                self.schedule();
            }
            Command::GetActive { jobname, reply } => {
                let _ = reply.send(self.job_activity(&jobname));
            }
            Command::GetClusterInfo { reply } => {
                let _ = reply.send(self.cluster_info());
            }
            Command::GetNodeInfo { node, reply } => {
                let _ = reply.send(self.node_detail(&node));
            }
            Command::WorkerDone(completion) => self.clean_worker(completion),
        }
    }

    // ── Admission and dispatch ────────────────────────────────────────────────

    fn admit(&mut self, task: Task) {
        debug!(
            job = %task.jobname,
            part = task.partid,
            mode = %task.mode,
            "task admitted to waitlist"
        );
        self.events.job_event(
            &task.jobname,
            &format!("task {} ({}) added to waitlist", task.partid, task.mode),
        );
        self.waitlist.push_back(task);
        self.schedule();
    }

    /// Drain the waitlist for as long as each head either dispatches or
    /// fails terminally. Always returns; a head that merely cannot be
    /// placed right now stays put until the next poke.
    fn schedule(&mut self) {
        while !self.waitlist.is_empty() {
            let decision = select_node(&self.registry, &self.waitlist[0].placement);
            match decision {
                Selection::Node(node) => {
                    if let Some(task) = self.waitlist.pop_front() {
                        self.start_worker(task, node);
                    }
                }
                Selection::Busy => break,
                Selection::AllBad { tried, total } if tried == total => {
                    if let Some(task) = self.waitlist.pop_front() {
                        warn!(
                            job = %task.jobname,
                            part = task.partid,
                            "task has failed on every configured node"
                        );
                        self.events.job_event(
                            &task.jobname,
                            &format!(
                                "task {} dropped: failed on all {} configured node(s)",
                                task.partid, total
                            ),
                        );
                        task.reply_to.notify(JobUpdate::MasterError {
                            message: ALL_NODES_FAILED.to_string(),
                        });
                    }
                }
                // Excluded only for now; a whitelist or reload can free it.
                // A blacklist larger than the configured set lands here too:
                // stale entries for removed nodes say nothing about the
                // nodes that remain.
                Selection::AllBad { .. } => break,
            }
        }
    }

    fn start_worker(&mut self, task: Task, node: String) {
        // The slot is claimed before the worker exists: a worker may report
        // termination the moment it is launched, and that report must find
        // the load it decrements.
        self.registry.add_load(&node);
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let Some(tx) = self.completions.upgrade() else {
            // Only reachable while the last handles are being dropped.
            debug!(job = %task.jobname, part = task.partid, "shutting down, not launching");
            self.registry.sub_load(&node);
            return;
        };

        info!(
            job = %task.jobname,
            part = task.partid,
            node = %node,
            worker = id,
            "task assigned"
        );
        self.events.job_event(
            &task.jobname,
            &format!("task {} assigned to node {}", task.partid, node),
        );

        let spec = WorkerSpec {
            worker_id: id,
            jobname: task.jobname.clone(),
            partid: task.partid,
            mode: task.mode,
            node: node.clone(),
            input: task.input,
            data: task.data,
        };
        let handle = self.launcher.launch(spec, CompletionSender { tx });
        self.registry.insert_worker(WorkerRecord {
            id,
            jobname: task.jobname,
            node,
            mode: task.mode,
            partid: task.partid,
            reply_to: task.reply_to,
            handle,
        });
    }

    // ── Lifecycle events ──────────────────────────────────────────────────────

    /// Bookkeeping for one worker death, normal or not. The counter is
    /// updated, the record removed, the load slot released, the coordinator
    /// notified, and the freed slot offered to the waitlist.
    fn clean_worker(&mut self, completion: Completion) {
        let Some(record) = self.registry.remove_worker(completion.worker_id) else {
            warn!(
                worker = completion.worker_id,
                "termination report for unknown worker, ignoring"
            );
            self.events.master_event(&format!(
                "termination report for unknown worker {}",
                completion.worker_id
            ));
            return;
        };

        self.registry.record_outcome(&record.node, completion.result);
        self.registry.sub_load(&record.node);
        debug!(
            worker = record.id,
            job = %record.jobname,
            part = record.partid,
            node = %record.node,
            result = completion.result.as_str(),
            "worker finished"
        );
        self.events.job_event(
            &record.jobname,
            &format!(
                "task {} on node {} finished: {}",
                record.partid, record.node, completion.result
            ),
        );
        record.reply_to.notify(JobUpdate::Outcome {
            result: completion.result,
            message: completion.message,
            node: record.node,
            partid: record.partid,
        });
        self.schedule();
    }

    fn kill_job(&mut self, jobname: &str) {
        let workers = self.registry.job_workers(jobname);
        for id in &workers {
            if let Some(record) = self.registry.worker_mut(*id) {
                record.handle.kill();
            }
        }
        let waiting = self.waitlist.len();
        self.waitlist.retain(|task| task.jobname != jobname);
        let dropped = waiting - self.waitlist.len();
        info!(job = jobname, signalled = workers.len(), dropped, "job killed");
        self.events.job_event(
            jobname,
            &format!(
                "job killed: {} running worker(s) signalled, {} waiting task(s) dropped",
                workers.len(),
                dropped
            ),
        );
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    fn job_activity(&self, jobname: &str) -> JobActivity {
        let mut activity = JobActivity::default();
        for id in self.registry.job_workers(jobname) {
            if let Some(record) = self.registry.worker(id) {
                activity.nodes.push(record.node.clone());
                activity.partids.push(record.partid);
            }
        }
        activity
    }

    fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            nodes: self
                .registry
                .configured()
                .map(|(name, capacity)| self.node_row(name, capacity))
                .collect(),
            active: self.active_workers(self.registry.worker_ids()),
        }
    }

    fn node_detail(&self, node: &str) -> Result<NodeDetail, SchedulerError> {
        let Some(capacity) = self.registry.capacity(node) else {
            return Err(SchedulerError::UnknownNode(node.to_string()));
        };
        Ok(NodeDetail {
            stats: self.node_row(node, capacity),
            active: self.active_workers(self.registry.node_workers(node)),
        })
    }

    fn node_row(&self, name: &str, capacity: u32) -> NodeInfo {
        let stats = self.registry.stats(name);
        NodeInfo {
            name: name.to_string(),
            capacity,
            load: self.registry.load(name),
            ok: stats.ok,
            data_error: stats.data_error,
            error: stats.crash,
            blacklisted: self.registry.is_blacklisted(name),
        }
    }

    fn active_workers(&self, ids: Vec<WorkerId>) -> Vec<ActiveWorker> {
        ids.into_iter()
            .filter_map(|id| self.registry.worker(id))
            .map(|record| ActiveWorker {
                jobname: record.jobname.clone(),
                node: record.node.clone(),
                mode: record.mode,
                partid: record.partid,
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
