/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Worker launching and termination reporting.
//!
//! The master never runs a task itself. It hands a [`WorkerSpec`] to a
//! [`WorkerLauncher`] and from then on knows the worker only through two
//! channels: the [`CompletionSender`] the worker (or its supervisor) uses to
//! report termination, and the [`WorkerHandle`] the master uses to request a
//! best-effort kill.
//!
//! [`ProcessLauncher`] is the production implementation: one OS process per
//! task. Its contract with the worker executable:
//!
//! * arguments: `--job <name> --part <n> --mode <map|reduce> --node <name>`
//! * stdin: two lines, the task input followed by the task data payload
//! * stdout/stderr: free-form; the trimmed output becomes the outcome message
//! * exit status: `0` ok, `2` data error, `3` job error; anything else,
//!   including death by signal, counts as a crash
//!
//! Embedders with a different worker transport implement [`WorkerLauncher`]
//! themselves and classify outcomes as they see fit.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::scheduler::CompletionSender;
use crate::task::{TaskMode, TaskResult, WorkerId};

/// Exit status a worker process uses to report unreadable or malformed input.
pub const EXIT_DATA_ERROR: i32 = 2;

/// Exit status a worker process uses to report a failure of the job code itself.
pub const EXIT_JOB_ERROR: i32 = 3;

// ── Worker specification ──────────────────────────────────────────────────────

/// Everything a launcher needs to start one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Handle the termination report must carry.
    pub worker_id: WorkerId,
    pub jobname: String,
    pub partid: u32,
    pub mode: TaskMode,
    /// Node the task was placed on.
    pub node: String,
    pub input: String,
    pub data: String,
}

/// Termination report for a launched worker.
#[derive(Debug, Clone)]
pub struct Completion {
    pub worker_id: WorkerId,
    pub result: TaskResult,
    pub message: String,
}

// ── Launcher capability ───────────────────────────────────────────────────────

/// Capability to start workers.
pub trait WorkerLauncher: Send + Sync {
    /// Start the worker described by `spec`.
    ///
    /// The implementation must eventually deliver exactly one [`Completion`]
    /// carrying `spec.worker_id` on `done`, a failure to start included. The
    /// returned handle is the master's kill switch for this worker.
    fn launch(&self, spec: WorkerSpec, done: CompletionSender) -> WorkerHandle;
}

/// Kill switch for one running worker.
///
/// The signal fires at most once; further calls are no-ops. Dropping the
/// handle without killing also fires the switch, so workers do not outlive
/// the master that spawned them.
#[derive(Debug)]
pub struct WorkerHandle {
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    /// Handle wired to the receiving side of `kill`.
    pub fn new(kill: oneshot::Sender<()>) -> Self {
        Self { kill: Some(kill) }
    }

    /// Handle for a worker that cannot be signalled.
    pub fn detached() -> Self {
        Self { kill: None }
    }

    /// Ask the worker to stop. Best-effort: a worker that already exited
    /// simply never sees the request.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
    }
}

// ── Process-backed workers ────────────────────────────────────────────────────

/// Launches one OS process per task. See the module docs for the contract
/// with the worker executable.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: WorkerSpec, done: CompletionSender) -> WorkerHandle {
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(run_worker(self.program.clone(), spec, done, kill_rx));
        WorkerHandle::new(kill_tx)
    }
}

/// Map a worker process exit code to the outcome reported to the scheduler.
/// `None` means the process died on a signal.
fn classify_exit(code: Option<i32>) -> TaskResult {
    match code {
        Some(0) => TaskResult::Ok,
        Some(EXIT_DATA_ERROR) => TaskResult::DataError,
        Some(EXIT_JOB_ERROR) => TaskResult::JobError,
        _ => TaskResult::Error,
    }
}

/// Supervise one worker process from spawn to termination report.
async fn run_worker(
    program: PathBuf,
    spec: WorkerSpec,
    done: CompletionSender,
    mut kill: oneshot::Receiver<()>,
) {
    let worker_id = spec.worker_id;

    let mut cmd = Command::new(&program);
    cmd.arg("--job")
        .arg(&spec.jobname)
        .arg("--part")
        .arg(spec.partid.to_string())
        .arg("--mode")
        .arg(spec.mode.as_str())
        .arg("--node")
        .arg(&spec.node)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(
                worker = worker_id,
                program = %program.display(),
                "failed to start worker: {err}"
            );
            done.send(Completion {
                worker_id,
                result: TaskResult::Error,
                message: format!("failed to start worker: {err}"),
            });
            return;
        }
    };

    // Hand the task payload over and close stdin so the worker sees EOF.
    if let Some(mut stdin) = child.stdin.take() {
        let payload = format!("{}\n{}\n", spec.input, spec.data);
        if let Err(err) = stdin.write_all(payload.as_bytes()).await {
            debug!(worker = worker_id, "could not write task payload: {err}");
        }
    }

    // Output must be drained while waiting, otherwise a chatty worker fills
    // the pipe buffer and never exits.
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let drain = async {
        let mut out = String::new();
        let mut err = String::new();
        if let Some(stream) = stdout.as_mut() {
            let _ = stream.read_to_string(&mut out).await;
        }
        if let Some(stream) = stderr.as_mut() {
            let _ = stream.read_to_string(&mut err).await;
        }
        (out, err)
    };

    let supervise = async {
        let mut killed = false;
        let status = loop {
            if killed {
                // Kill signal already forwarded; only reaping remains.
                break child.wait().await;
            }
            tokio::select! {
                status = child.wait() => break status,
                _ = &mut kill => killed = true,
            }
            let _ = child.start_kill();
        };
        (status, killed)
    };

    let ((status, killed), (out, err)) = tokio::join!(supervise, drain);

    let completion = match status {
        Err(err) => Completion {
            worker_id,
            result: TaskResult::Error,
            message: format!("failed to reap worker: {err}"),
        },
        Ok(_) if killed => Completion {
            worker_id,
            result: TaskResult::Error,
            message: "worker killed".to_string(),
        },
        Ok(status) => {
            let trimmed = out.trim();
            let mut message = if trimmed.is_empty() {
                err.trim().to_string()
            } else {
                trimmed.to_string()
            };
            if message.is_empty() {
                message = status.to_string();
            }
            Completion {
                worker_id,
                result: classify_exit(status.code()),
                message,
            }
        }
    };
    done.send(completion);
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Exit classification ───────────────────────────────────────────────────

    #[test]
    fn exit_zero_is_ok() {
        assert_eq!(classify_exit(Some(0)), TaskResult::Ok);
    }

    #[test]
    fn exit_two_is_data_error() {
        assert_eq!(classify_exit(Some(EXIT_DATA_ERROR)), TaskResult::DataError);
    }

    #[test]
    fn exit_three_is_job_error() {
        assert_eq!(classify_exit(Some(EXIT_JOB_ERROR)), TaskResult::JobError);
    }

    #[test]
    fn other_exit_codes_are_crashes() {
        assert_eq!(classify_exit(Some(1)), TaskResult::Error);
        assert_eq!(classify_exit(Some(42)), TaskResult::Error);
        assert_eq!(classify_exit(Some(-1)), TaskResult::Error);
    }

    #[test]
    fn death_by_signal_is_a_crash() {
        assert_eq!(classify_exit(None), TaskResult::Error);
    }

    // ── Kill handle ───────────────────────────────────────────────────────────

    #[test]
    fn kill_fires_the_channel_once() {
        let (tx, mut rx) = oneshot::channel();
        let mut handle = WorkerHandle::new(tx);
        handle.kill();
        assert!(rx.try_recv().is_ok());
        // Second kill is a no-op, not a panic
        handle.kill();
    }

    #[test]
    fn dropping_the_handle_counts_as_kill() {
        let (tx, mut rx) = oneshot::channel::<()>();
        drop(WorkerHandle::new(tx));
        // Sender gone: the supervising side treats this as a kill request
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detached_handle_kill_is_a_noop() {
        let mut handle = WorkerHandle::detached();
        handle.kill();
    }
}
