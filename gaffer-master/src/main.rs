/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Master scheduler daemon.
//!
//! Loads the cluster configuration, starts the scheduler with a
//! process-backed worker launcher, and then supervises: SIGHUP re-reads the
//! configuration file, ctrl-c shuts down. Coordinators and admin tooling
//! talk to the [`Scheduler`] handle; wiring that handle to a transport is
//! the embedder's concern.
//!
//! [`Scheduler`]: gaffer_master::scheduler::Scheduler

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gaffer_master::config::ClusterConfig;
use gaffer_master::events::LogEvents;
use gaffer_master::launch::ProcessLauncher;
use gaffer_master::scheduler::Scheduler;

/// Master scheduler for a gaffer compute cluster.
#[derive(Debug, Parser)]
#[command(name = "gaffer-master", version, about)]
struct Args {
    /// Cluster configuration file (YAML).
    #[arg(long, default_value = "cluster.yaml")]
    config: PathBuf,

    /// Worker executable launched once per dispatched task.
    #[arg(long)]
    worker: PathBuf,

    /// Log filter used when RUST_LOG is not set (e.g. "gaffer_master=debug").
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .init();

    let mut config = ClusterConfig::new();
    config
        .load_from_file(&args.config)
        .context("initial configuration load failed")?;

    let scheduler = Scheduler::spawn(
        config.node_specs(),
        Arc::new(ProcessLauncher::new(args.worker.clone())),
        Arc::new(LogEvents),
    );
    info!(
        config = %args.config.display(),
        worker = %args.worker.display(),
        "master scheduler started"
    );

    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .context("cannot install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = hangup.recv() => {
                // A file that fails to parse leaves the running node set
                // untouched.
                match config.load_from_file(&args.config) {
                    Ok(()) => {
                        if scheduler.update_config(config.node_specs()).await.is_err() {
                            warn!("scheduler stopped, exiting");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("configuration reload failed, keeping previous node set: {err:#}");
                    }
                }
            }
        }
    }

    info!("master scheduler shutting down");
    Ok(())
}
