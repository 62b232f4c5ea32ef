// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Command and notification plumbing between coordinator and builder.
//!
//! The coordinator pushes [`Command`]s and wakes the builder through a
//! condition variable; the builder pushes [`Notification`]s and wakes the
//! coordinator by posting [`Event::BuilderWake`] on the event channel. Both
//! queues are touched only under their mutex, and the coordinator drains the
//! notification queue with a single swap.

use crate::bus::Event;
use crate::datasrc_info::SegmentKey;
use memmgr_proto::{GenerationId, Name};
use std::collections::VecDeque;
use std::mem;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::{Condvar, Mutex};

/// A unit of work for the builder thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Integrity-check an existing mapped file.
    Validate { key: SegmentKey, target: PathBuf },
    /// (Re)build segment contents, optionally restricted to one zone origin.
    Load {
        key: SegmentKey,
        origin: Option<Name>,
        target: PathBuf,
    },
    /// Bring the retired file version up to date once every reader has
    /// switched to the published one.
    Copy { key: SegmentKey, target: PathBuf },
    /// Abort and discard all work for a superseded generation.
    Cancel { generation: GenerationId },
    /// Stop the builder thread.
    Shutdown,
}

/// A completion report from the builder thread.
///
/// Copy-phase completions arrive as `LoadCompleted`; the segment state
/// machine knows which phase it was waiting on.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ValidateCompleted { key: SegmentKey, succeeded: bool },
    LoadCompleted { key: SegmentKey, succeeded: bool },
    CancelCompleted { generation: GenerationId },
}

/// The two queues shared between coordinator and builder.
pub struct BuilderChannel {
    commands: Mutex<VecDeque<Command>>,
    available: Condvar,
    notifications: Mutex<Vec<Notification>>,
    wakeup: Sender<Event>,
}

impl BuilderChannel {
    pub fn new(wakeup: Sender<Event>) -> Self {
        BuilderChannel {
            commands: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            notifications: Mutex::new(Vec::new()),
            wakeup,
        }
    }

    /// Coordinator side: queue a command and wake the builder.
    pub fn push_command(&self, command: Command) {
        let mut commands = self.commands.lock().unwrap();
        commands.push_back(command);
        self.available.notify_one();
    }

    /// Builder side: block until a command is available and take it.
    pub fn wait_command(&self) -> Command {
        let mut commands = self.commands.lock().unwrap();
        loop {
            if let Some(command) = commands.pop_front() {
                return command;
            }
            commands = self.available.wait(commands).unwrap();
        }
    }

    /// Number of commands not yet taken by the builder.
    pub fn commands_pending(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    /// Builder side: report a completion and wake the coordinator loop. The
    /// wake-up is best effort; a gone coordinator is already shutting down.
    pub fn push_notification(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
        let _ = self.wakeup.send(Event::BuilderWake);
    }

    /// Coordinator side: atomically take every queued notification.
    pub fn take_notifications(&self) -> Vec<Notification> {
        mem::take(&mut *self.notifications.lock().unwrap())
    }

    /// Test hook: pop and return everything currently queued.
    #[cfg(test)]
    pub(crate) fn drain_commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod t_builder_channel {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_commands_are_fifo() {
        let (tx, _rx) = channel();
        let chan = BuilderChannel::new(tx);
        chan.push_command(Command::Cancel {
            generation: GenerationId(1),
        });
        chan.push_command(Command::Shutdown);
        assert_eq!(2, chan.commands_pending());
        assert_eq!(
            Command::Cancel {
                generation: GenerationId(1)
            },
            chan.wait_command()
        );
        assert_eq!(Command::Shutdown, chan.wait_command());
        assert_eq!(0, chan.commands_pending());
    }

    #[test]
    fn test_wait_command_blocks_until_pushed() {
        let (tx, _rx) = channel();
        let chan = Arc::new(BuilderChannel::new(tx));
        let waiter = Arc::clone(&chan);
        let handle = thread::spawn(move || waiter.wait_command());
        chan.push_command(Command::Shutdown);
        assert_eq!(Command::Shutdown, handle.join().unwrap());
    }

    #[test]
    fn test_notification_wakes_coordinator() {
        let (tx, rx) = channel();
        let chan = BuilderChannel::new(tx);
        chan.push_notification(Notification::CancelCompleted {
            generation: GenerationId(42),
        });
        assert!(matches!(rx.recv().unwrap(), Event::BuilderWake));
        assert_eq!(
            vec![Notification::CancelCompleted {
                generation: GenerationId(42)
            }],
            chan.take_notifications()
        );
        // the drain leaves an empty queue behind
        assert!(chan.take_notifications().is_empty());
    }

    #[test]
    fn test_wakeup_without_receiver_is_harmless() {
        let (tx, rx) = channel();
        drop(rx);
        let chan = BuilderChannel::new(tx);
        chan.push_notification(Notification::CancelCompleted {
            generation: GenerationId(0),
        });
        assert_eq!(1, chan.take_notifications().len());
    }
}
