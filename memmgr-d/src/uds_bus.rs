// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Unix-socket client for the message bus daemon.
//!
//! Frames are newline-delimited JSON objects with a `type` field. Outbound
//! traffic goes through a shared writer; inbound traffic is read by a
//! dedicated socket-reader thread that marshals notifications, commands and
//! configuration updates onto the coordinator's event channel. RPC replies
//! are routed back to the calling thread, which is the only blocking path.
//!
//! Answers to module commands are written by a small writer thread: the
//! coordinator answers commands in arrival order, so pairing answers with
//! the queued frame sequence numbers is FIFO.

use crate::bus::{Bus, BusError, Event};
use memmgr_proto::ReaderId;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on any synchronous bus request.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UdsBus {
    writer: Arc<Mutex<UnixStream>>,
    rpc_replies: Receiver<Value>,
    seq: u64,
}

impl UdsBus {
    /// Connect to the bus daemon at `socket` and start marshaling inbound
    /// traffic onto `events`. Loss of the connection posts a shutdown event.
    pub fn connect(socket: &Path, events: Sender<Event>) -> Result<UdsBus, BusError> {
        let stream = UnixStream::connect(socket)?;
        info!("connected to message bus at {}", socket.display());

        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        let (rpc_tx, rpc_replies) = channel();
        let (answer_tx, answer_rx) = channel();
        let pending = Arc::new(Mutex::new(VecDeque::new()));

        let reader_pending = Arc::clone(&pending);
        thread::Builder::new()
            .name("bus-reader".to_string())
            .spawn(move || run_reader(stream, events, rpc_tx, reader_pending, answer_tx))?;

        let answer_writer = Arc::clone(&writer);
        thread::Builder::new()
            .name("bus-answer".to_string())
            .spawn(move || run_answer_writer(answer_writer, answer_rx, pending))?;

        Ok(UdsBus {
            writer,
            rpc_replies,
            seq: 0,
        })
    }

    fn write_frame(&self, frame: &Value) -> Result<(), BusError> {
        write_frame(&self.writer, frame)
    }

    /// Send a sequenced request and wait for the matching reply.
    fn round_trip(&mut self, mut frame: Value) -> Result<Value, BusError> {
        self.seq += 1;
        frame["seq"] = json!(self.seq);
        self.write_frame(&frame)?;
        loop {
            let reply = self
                .rpc_replies
                .recv_timeout(RPC_TIMEOUT)
                .map_err(|_| BusError::Timeout)?;
            if reply.get("seq").and_then(Value::as_u64) == Some(self.seq) {
                return Ok(reply);
            }
            debug!("discarding stale rpc reply {reply}");
        }
    }
}

impl Bus for UdsBus {
    fn subscribe_notification(&mut self, group: &str) -> Result<(), BusError> {
        self.write_frame(&json!({ "type": "subscribe", "group": group }))
    }

    fn add_remote_config(&mut self, module: &str) -> Result<Value, BusError> {
        let reply = self.round_trip(json!({ "type": "remote-config", "module": module }))?;
        match reply.get("config") {
            Some(config) => Ok(config.clone()),
            None => Err(BusError::BadFrame("remote-config reply without config".into())),
        }
    }

    fn send(&mut self, group: &str, recipient: &ReaderId, command: Value) -> Result<(), BusError> {
        self.write_frame(&json!({
            "type": "send",
            "group": group,
            "to": recipient,
            "command": command,
        }))
    }

    fn rpc(&mut self, command: &str, group: &str, params: Value) -> Result<Vec<Value>, BusError> {
        let reply = self.round_trip(json!({
            "type": "rpc",
            "command": command,
            "group": group,
            "params": params,
        }))?;
        match reply.get("result").and_then(Value::as_array) {
            Some(result) => Ok(result.clone()),
            None => Err(BusError::BadFrame("rpc reply without result".into())),
        }
    }
}

fn write_frame(writer: &Mutex<UnixStream>, frame: &Value) -> Result<(), BusError> {
    let mut stream = writer.lock().unwrap();
    writeln!(&mut *stream, "{frame}")?;
    Ok(())
}

fn run_reader(
    stream: UnixStream,
    events: Sender<Event>,
    rpc_tx: Sender<Value>,
    pending: Arc<Mutex<VecDeque<u64>>>,
    answer_tx: Sender<Option<Value>>,
) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("bus read failure: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping unparseable bus frame: {e}");
                continue;
            }
        };
        let delivered = match frame.get("type").and_then(Value::as_str) {
            Some("notification") => events.send(Event::Notification {
                group: text_field(&frame, "group"),
                event: text_field(&frame, "event"),
                params: frame.get("params").cloned().unwrap_or(Value::Null),
            }),
            Some("command") => {
                let Some(seq) = frame.get("seq").and_then(Value::as_u64) else {
                    warn!("dropping command frame without seq");
                    continue;
                };
                pending.lock().unwrap().push_back(seq);
                events.send(Event::ModCommand {
                    name: text_field(&frame, "name"),
                    params: frame.get("params").cloned().unwrap_or(Value::Null),
                    reply: answer_tx.clone(),
                })
            }
            Some("config") => events.send(Event::RemoteConfig {
                config: frame.get("config").cloned().unwrap_or(Value::Null),
            }),
            Some("rpc-reply") => {
                let _ = rpc_tx.send(frame);
                Ok(())
            }
            other => {
                warn!("dropping bus frame of unknown type {other:?}");
                Ok(())
            }
        };
        if delivered.is_err() {
            // the coordinator is gone; nothing left to marshal for
            break;
        }
    }
    info!("bus connection closed");
    let _ = events.send(Event::Shutdown);
}

fn run_answer_writer(
    writer: Arc<Mutex<UnixStream>>,
    answers: Receiver<Option<Value>>,
    pending: Arc<Mutex<VecDeque<u64>>>,
) {
    for answer in answers {
        let Some(seq) = pending.lock().unwrap().pop_front() else {
            error!("answer without a pending command frame");
            continue;
        };
        let frame = json!({ "type": "answer", "seq": seq, "answer": answer });
        if write_frame(&writer, &frame).is_err() {
            error!("failed to write answer frame");
            break;
        }
    }
}

fn text_field(frame: &Value, field: &str) -> String {
    frame
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
