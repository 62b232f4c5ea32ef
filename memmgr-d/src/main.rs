// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Memory Manager Daemon
//!
//! This binary runs the memory manager for shared-memory zone segments.

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{info, Level};

use memmgr_d::builder_channel::BuilderChannel;
use memmgr_d::coordinator::Coordinator;
use memmgr_d::signal::register_shutdown_signals;
use memmgr_d::uds_bus::UdsBus;
use memmgr_proto::message::parse_answer;

#[derive(Parser, Debug)]
#[command(author, name = "memmgrd", version, about, long_about = None)]
struct Cli {
    /// Directory holding the mapped segment files. Must exist and be
    /// writable by the daemon.
    #[arg(short, long)]
    mapped_file_dir: Option<PathBuf>,

    /// Path of the message bus Unix socket.
    #[arg(short, long, default_value = "/var/run/memmgr/msgq.sock")]
    bus_socket: PathBuf,

    /// Emit structured log messages. Default to human readable.
    #[arg(short, long)]
    json_output: bool,
}

// Memory manager application entry point.
fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Thread names and source locations make the coordinator/builder
    // interleaving readable; the target column adds nothing here. DEBUG is
    // compiled out of release builds by the tracing feature flags.
    let log = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if args.json_output {
        log.json().flatten_event(true).init();
    } else {
        log.init();
    }

    // First line in the log, even if startup fails right after.
    info!("memory manager daemon is starting");

    let (events_tx, events_rx) = mpsc::channel();
    register_shutdown_signals(events_tx.clone()).context("registering signal handlers")?;

    let bus = UdsBus::connect(&args.bus_socket, events_tx.clone()).with_context(|| {
        format!(
            "connecting to the message bus at {}",
            args.bus_socket.display()
        )
    })?;

    let channel = Arc::new(BuilderChannel::new(events_tx));
    let mut coordinator = Coordinator::new(bus, channel);

    // The initial configuration goes through the regular handler so a bad
    // mapped_file_dir produces the same answer a reconfiguration would.
    let mut initial = serde_json::Map::new();
    if let Some(dir) = &args.mapped_file_dir {
        initial.insert("mapped_file_dir".to_string(), json!(dir));
    }
    let answer = coordinator.config_handler(&serde_json::Value::Object(initial));
    let (code, message) = parse_answer(&answer).context("parsing the configuration answer")?;
    if code != 0 {
        bail!(
            "configuration rejected: {}",
            message.unwrap_or_else(|| "unknown reason".to_string())
        );
    }

    coordinator
        .setup()
        .context("memory manager startup failed")?;
    coordinator.run(&events_rx);
    Ok(())
}
