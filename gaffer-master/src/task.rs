/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core task and outcome types for the master scheduler.
//!
//! Two directions of traffic meet here:
//!
//! ```text
//! coordinator ──(Task)──►  Scheduler  ──(WorkerSpec)──►  worker
//!       ▲                                                  │
//!       └──────────(JobUpdate via CoordinatorHandle)───────┘
//! ```
//!
//! A [`Task`] is immutable once submitted. The scheduler never looks inside
//! `input` or `data`; those travel untouched to the worker that eventually
//! runs the partition.

use std::collections::BTreeSet;
use std::fmt;

use tokio::sync::mpsc;

/// Unique handle for one spawned worker, allocated by the scheduler.
pub type WorkerId = u64;

// ── Task mode ─────────────────────────────────────────────────────────────────

/// The phase a task belongs to.
///
/// Carried as a typed enum through the whole pipeline; the string form only
/// appears at the worker boundary and in event lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskMode {
    #[default]
    Map,
    Reduce,
}

impl TaskMode {
    /// String form used in worker arguments and progress events.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskMode::Map => "map",
            TaskMode::Reduce => "reduce",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Placement ─────────────────────────────────────────────────────────────────

/// Where a task would like to run, and where it must not.
///
/// The preferred node is a data-locality hint; the blacklist accumulates
/// nodes that have already failed this particular task. Coordinators
/// resubmitting a failed task are expected to extend the blacklist with the
/// node the failure was reported from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Node the task would ideally run on. `None` means no preference.
    pub pref: Option<String>,

    /// Nodes this task must never be placed on again.
    pub blacklist: BTreeSet<String>,
}

impl Placement {
    /// Placement with no preference and no exclusions.
    pub fn anywhere() -> Self {
        Self::default()
    }

    /// Placement preferring `node`.
    pub fn on(node: impl Into<String>) -> Self {
        Self {
            pref: Some(node.into()),
            blacklist: BTreeSet::new(),
        }
    }

    /// Extend the per-task blacklist.
    pub fn excluding<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(nodes.into_iter().map(Into::into));
        self
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

/// One partition of a job, as submitted by a coordinator.
#[derive(Debug, Clone)]
pub struct Task {
    /// Identifier grouping related partitions into a job.
    pub jobname: String,

    /// Partition index within the job.
    pub partid: u32,

    /// Task kind.
    pub mode: TaskMode,

    /// Preferred node and per-task blacklist.
    pub placement: Placement,

    /// Opaque payload forwarded to the worker.
    pub input: String,

    /// Opaque payload forwarded to the worker.
    pub data: String,

    /// Where the eventual outcome notification goes.
    pub reply_to: CoordinatorHandle,
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    /// The task completed.
    Ok,
    /// The task's input was unreadable or malformed on this node.
    DataError,
    /// The job's own code failed.
    JobError,
    /// Anything else: spawn failure, crash, kill.
    Error,
}

impl TaskResult {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskResult::Ok => "ok",
            TaskResult::DataError => "data_error",
            TaskResult::JobError => "job_error",
            TaskResult::Error => "error",
        }
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous notification delivered to a job coordinator.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// A worker for one of the job's partitions terminated.
    Outcome {
        result: TaskResult,
        message: String,
        node: String,
        partid: u32,
    },

    /// A partition could not be placed anywhere and has been dropped.
    /// Sent exactly once per abandoned task.
    MasterError { message: String },
}

// ── Coordinator handle ────────────────────────────────────────────────────────

/// Reply channel of the coordinator that submitted a task.
///
/// Delivery is best-effort: a coordinator that has gone away simply stops
/// receiving updates, the scheduler keeps its own bookkeeping regardless.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<JobUpdate>,
}

impl CoordinatorHandle {
    /// Create a handle plus the receiving side the coordinator reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send one notification, ignoring a departed coordinator.
    pub fn notify(&self, update: JobUpdate) {
        let _ = self.tx.send(update);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_mode_string_forms() {
        assert_eq!(TaskMode::Map.as_str(), "map");
        assert_eq!(TaskMode::Reduce.as_str(), "reduce");
        assert_eq!(TaskMode::Reduce.to_string(), "reduce");
    }

    #[test]
    fn task_result_string_forms() {
        assert_eq!(TaskResult::Ok.as_str(), "ok");
        assert_eq!(TaskResult::DataError.as_str(), "data_error");
        assert_eq!(TaskResult::JobError.as_str(), "job_error");
        assert_eq!(TaskResult::Error.as_str(), "error");
    }

    #[test]
    fn placement_on_sets_preference_only() {
        let p = Placement::on("alpha");
        assert_eq!(p.pref.as_deref(), Some("alpha"));
        assert!(p.blacklist.is_empty());
    }

    #[test]
    fn placement_excluding_accumulates() {
        let p = Placement::anywhere()
            .excluding(["alpha"])
            .excluding(["beta", "alpha"]);
        assert!(p.pref.is_none());
        assert_eq!(p.blacklist.len(), 2);
        assert!(p.blacklist.contains("alpha"));
        assert!(p.blacklist.contains("beta"));
    }

    #[test]
    fn coordinator_handle_delivers_updates() {
        let (handle, mut rx) = CoordinatorHandle::channel();
        handle.notify(JobUpdate::MasterError {
            message: "boom".into(),
        });
        match rx.try_recv().unwrap() {
            JobUpdate::MasterError { message } => assert_eq!(message, "boom"),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn coordinator_handle_ignores_departed_receiver() {
        let (handle, rx) = CoordinatorHandle::channel();
        drop(rx);
        // Must not panic or error
        handle.notify(JobUpdate::MasterError {
            message: "nobody listening".into(),
        });
    }
}
