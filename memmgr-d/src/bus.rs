// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Message bus adapter interface.
//!
//! The bus itself is an external daemon; the coordinator only needs the
//! narrow surface below. Inbound traffic is marshaled onto the coordinator
//! thread as [`Event`] values, so every handler runs on that one thread
//! regardless of how the concrete bus delivers messages.

use memmgr_proto::ReaderId;
use serde_json::Value;
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Failure of a bus operation.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("bus request timed out")]
    Timeout,
    #[error("malformed bus frame: {0}")]
    BadFrame(String),
}

/// One unit of work for the coordinator event loop.
#[derive(Debug)]
pub enum Event {
    /// A group notification the coordinator subscribed to.
    Notification {
        group: String,
        event: String,
        params: Value,
    },
    /// A synchronous module command; the answer (if any) is sent back through
    /// `reply`.
    ModCommand {
        name: String,
        params: Value,
        reply: Sender<Option<Value>>,
    },
    /// The data_sources remote configuration changed.
    RemoteConfig { config: Value },
    /// The builder appended to the notification queue.
    BuilderWake,
    /// Leave the event loop and run the shutdown sequence.
    Shutdown,
}

/// Narrow interface over the external message bus.
pub trait Bus {
    /// Register interest in a notification group.
    fn subscribe_notification(&mut self, group: &str) -> Result<(), BusError>;

    /// Subscribe to a remote configuration module and return its current
    /// configuration; later updates arrive as [`Event::RemoteConfig`].
    fn add_remote_config(&mut self, module: &str) -> Result<Value, BusError>;

    /// Fire-and-forget directed message to one member of a group.
    fn send(&mut self, group: &str, recipient: &ReaderId, command: Value) -> Result<(), BusError>;

    /// Synchronous request/response against a group.
    fn rpc(&mut self, command: &str, group: &str, params: Value) -> Result<Vec<Value>, BusError>;
}
