/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the master scheduler's public handle.
//!
//! Task-level failures never show up here: they travel to the owning
//! coordinator as [`JobUpdate`](crate::task::JobUpdate) notifications. These
//! variants cover the handle-to-core plumbing only.

use thiserror::Error;

/// Errors returned by [`Scheduler`](super::Scheduler) operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler core is no longer running. Every handle operation fails
    /// with this once the core task has exited.
    #[error("master scheduler has stopped")]
    Stopped,

    /// A per-node query named a node that is not in the configuration.
    #[error("node '{0}' is not part of the cluster configuration")]
    UnknownNode(String),
}
