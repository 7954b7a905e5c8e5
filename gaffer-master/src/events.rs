/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Event sink for human-readable progress lines.
//!
//! The scheduler narrates what it does (waitlist admission, node assignment,
//! blacklist changes, configuration reloads) through an [`EventSink`] injected
//! at construction. Job-scoped lines are what a user monitoring a job reads;
//! master-scoped lines cover everything not tied to a single job.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::info;

/// Capability to record progress events. Implementations must be cheap;
/// the scheduler calls these from inside its serialized decision path.
pub trait EventSink: Send + Sync {
    /// Record a progress line for one job.
    fn job_event(&self, jobname: &str, message: &str);

    /// Record a cluster-wide line not tied to any job.
    fn master_event(&self, message: &str);

    /// Discard everything recorded for a job.
    fn drop_job(&self, jobname: &str);
}

// ── Tracing-backed sink ───────────────────────────────────────────────────────

/// Forwards every event to the `tracing` pipeline. The daemon's default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl EventSink for LogEvents {
    fn job_event(&self, jobname: &str, message: &str) {
        info!(job = jobname, "{message}");
    }

    fn master_event(&self, message: &str) {
        info!("{message}");
    }

    fn drop_job(&self, jobname: &str) {
        info!(job = jobname, "event log dropped");
    }
}

// ── In-memory sink ────────────────────────────────────────────────────────────

/// Keeps per-job event lines in memory so they can be read back later.
///
/// Used by the test suite and by embedders that serve job event logs to
/// clients. [`EventSink::drop_job`] deletes the job's lines for good.
#[derive(Debug, Default)]
pub struct MemoryEvents {
    jobs: Mutex<HashMap<String, Vec<String>>>,
    master: Mutex<Vec<String>>,
}

impl MemoryEvents {
    /// All recorded lines for `jobname`, oldest first.
    pub fn job_log(&self, jobname: &str) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .get(jobname)
            .cloned()
            .unwrap_or_default()
    }

    /// All cluster-wide lines, oldest first.
    pub fn master_log(&self) -> Vec<String> {
        self.master.lock().unwrap().clone()
    }
}

impl EventSink for MemoryEvents {
    fn job_event(&self, jobname: &str, message: &str) {
        self.jobs
            .lock()
            .unwrap()
            .entry(jobname.to_string())
            .or_default()
            .push(message.to_string());
    }

    fn master_event(&self, message: &str) {
        self.master.lock().unwrap().push(message.to_string());
    }

    fn drop_job(&self, jobname: &str) {
        self.jobs.lock().unwrap().remove(jobname);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_events_record_per_job() {
        let sink = MemoryEvents::default();
        sink.job_event("j1", "first");
        sink.job_event("j2", "other job");
        sink.job_event("j1", "second");

        assert_eq!(sink.job_log("j1"), vec!["first", "second"]);
        assert_eq!(sink.job_log("j2"), vec!["other job"]);
        assert!(sink.job_log("unknown").is_empty());
    }

    #[test]
    fn memory_events_drop_job_deletes_lines() {
        let sink = MemoryEvents::default();
        sink.job_event("j1", "line");
        sink.drop_job("j1");
        assert!(sink.job_log("j1").is_empty());
        // Dropping again is harmless
        sink.drop_job("j1");
    }

    #[test]
    fn memory_events_master_log_is_separate() {
        let sink = MemoryEvents::default();
        sink.master_event("node alpha blacklisted");
        sink.job_event("j1", "job line");
        assert_eq!(sink.master_log(), vec!["node alpha blacklisted"]);
        assert_eq!(sink.job_log("j1"), vec!["job line"]);
    }
}
