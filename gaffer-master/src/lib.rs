/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Gaffer master – scheduling authority of a map/reduce compute cluster
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/         – YAML cluster configuration (nodes and capacities)
//! ├── task.rs         – task, placement and outcome types
//! ├── registry.rs     – live workers, per-node load and outcome counters
//! ├── scheduler/      – waitlist, node selection, dispatch loop
//! ├── events.rs       – event sink for human-readable progress lines
//! └── launch.rs       – worker launching and termination reporting
//! ```

pub mod config;
pub mod events;
pub mod launch;
pub mod registry;
pub mod scheduler;
pub mod task;
