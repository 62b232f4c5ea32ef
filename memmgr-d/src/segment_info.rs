// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Per-segment lifecycle state machine.
//!
//! Each segment is backed by two mapped files, version 0 and version 1;
//! exactly one is live at a time. A load always targets the non-live file,
//! and a successful load switches the live version. Readers holding the
//! retired version are then walked over to the new one, and finally the
//! retired file is rebuilt (the copy phase) so both versions converge.
//!
//! The pending-events queue holds work that has not been handed to the
//! builder yet; at most one event per segment is ever in flight, tracked by
//! the state. Dispatching pops the queue head, stamps the current target
//! path into the command and moves the state off `Ready`.

use crate::builder_channel::Command;
use crate::datasrc_info::SegmentKey;
use memmgr_proto::{Name, ReaderId};
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lifecycle state of one mapped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Checking segment files found on disk; entered on creation.
    Validating,
    /// A load is running in the builder.
    Updating,
    /// Waiting for readers to acknowledge the published version.
    Synchronizing,
    /// Rebuilding the retired file version.
    Copying,
    /// Idle; the queue head may be dispatched.
    Ready,
}

/// Work waiting for its turn with the builder.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    Validate { target: PathBuf },
    Load { origin: Option<Name> },
}

/// Which side of the segment a parameter blob addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// The live file, for readers mapping the segment.
    ReadOnly,
    /// The build target, for (re)creating segment contents.
    Create,
}

/// State of a single mapped segment across its lifetime.
pub struct SegmentInfo {
    key: SegmentKey,
    mapped_file_dir: PathBuf,
    state: SegmentState,
    events: VecDeque<SegmentEvent>,
    current_readers: BTreeSet<ReaderId>,
    old_readers: BTreeSet<ReaderId>,
    live_version: u8,
    loaded: bool,
}

impl SegmentInfo {
    pub fn new(key: SegmentKey, mapped_file_dir: &Path) -> Self {
        SegmentInfo {
            key,
            mapped_file_dir: mapped_file_dir.to_path_buf(),
            state: SegmentState::Validating,
            events: VecDeque::new(),
            current_readers: BTreeSet::new(),
            old_readers: BTreeSet::new(),
            live_version: 0,
            loaded: false,
        }
    }

    pub fn key(&self) -> &SegmentKey {
        &self.key
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// True once a load has succeeded for this generation.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn current_readers(&self) -> &BTreeSet<ReaderId> {
        &self.current_readers
    }

    /// Readers not yet synchronized with the live version.
    pub fn old_readers(&self) -> &BTreeSet<ReaderId> {
        &self.old_readers
    }

    fn version_path(&self, version: u8) -> PathBuf {
        self.mapped_file_dir.join(format!(
            "{}-{}.segment.{}",
            self.key.name, self.key.class, version
        ))
    }

    fn live_path(&self) -> PathBuf {
        self.version_path(self.live_version)
    }

    fn build_path(&self) -> PathBuf {
        self.version_path(1 - self.live_version)
    }

    /// Begin the initial validation pass over both file versions. Returns the
    /// targets for the live and the non-live file; the caller dispatches the
    /// first directly and queues the second together with the initial load.
    pub fn start_validate(&mut self) -> (PathBuf, PathBuf) {
        debug_assert_eq!(SegmentState::Validating, self.state);
        (self.live_path(), self.build_path())
    }

    /// Append work to the pending queue.
    pub fn add_event(&mut self, event: SegmentEvent) {
        self.events.push_back(event);
    }

    /// Dispatch the queue head, if idle. Returns the builder command to
    /// forward, or nothing when the segment is busy or the queue is empty.
    pub fn start_update(&mut self) -> Option<Command> {
        if self.state != SegmentState::Ready {
            return None;
        }
        self.dispatch_next()
    }

    fn dispatch_next(&mut self) -> Option<Command> {
        match self.events.pop_front() {
            Some(SegmentEvent::Validate { target }) => {
                self.state = SegmentState::Validating;
                Some(Command::Validate {
                    key: self.key.clone(),
                    target,
                })
            }
            Some(SegmentEvent::Load { origin }) => {
                self.state = SegmentState::Updating;
                Some(Command::Load {
                    key: self.key.clone(),
                    origin,
                    target: self.build_path(),
                })
            }
            None => {
                self.state = SegmentState::Ready;
                None
            }
        }
    }

    /// The builder finished a validate step. Success or failure, the next
    /// queued event (if any) is dispatched; a bad file is simply rebuilt by
    /// the load that follows it.
    pub fn complete_validate(&mut self, _succeeded: bool) -> Option<Command> {
        if self.state != SegmentState::Validating {
            warn!("validate completion for segment {} in {:?}", self.key, self.state);
            return None;
        }
        self.dispatch_next()
    }

    /// The builder finished a load or copy step.
    ///
    /// A successful load publishes the freshly built file: the live version
    /// switches, and every attached reader moves to the old set until it
    /// acknowledges the new version. A failed load leaves the previous
    /// version in force and the queue continues draining.
    pub fn complete_update(&mut self, succeeded: bool) -> Option<Command> {
        match self.state {
            SegmentState::Updating => {
                if !succeeded {
                    return self.dispatch_next();
                }
                self.live_version = 1 - self.live_version;
                self.loaded = true;
                let attached = std::mem::take(&mut self.current_readers);
                self.old_readers.extend(attached);
                if self.old_readers.is_empty() {
                    self.state = SegmentState::Copying;
                    Some(Command::Copy {
                        key: self.key.clone(),
                        target: self.build_path(),
                    })
                } else {
                    self.state = SegmentState::Synchronizing;
                    None
                }
            }
            SegmentState::Copying => self.dispatch_next(),
            state => {
                warn!("update completion for segment {} in {:?}", self.key, state);
                None
            }
        }
    }

    /// Register a reader with this segment. A reader attached to a live,
    /// idle segment joins the current set; anyone else waits in the old set
    /// and is walked over at the next publication.
    pub fn add_reader(&mut self, reader: ReaderId) {
        if self.current_readers.contains(&reader) || self.old_readers.contains(&reader) {
            return;
        }
        if self.state == SegmentState::Ready && self.loaded {
            self.current_readers.insert(reader);
        } else {
            self.old_readers.insert(reader);
        }
    }

    /// A reader acknowledged the live version. Returns the copy-phase
    /// command when this was the last reader the segment was waiting on.
    pub fn sync_reader(&mut self, reader: &ReaderId) -> Option<Command> {
        if !self.old_readers.remove(reader) {
            return None;
        }
        self.current_readers.insert(reader.clone());
        self.proceed_if_synchronized()
    }

    /// Drop a reader entirely (it unsubscribed). Removing the last reader
    /// the segment was waiting on unblocks the copy phase just like an
    /// acknowledgment would.
    pub fn remove_reader(&mut self, reader: &ReaderId) -> Option<Command> {
        self.current_readers.remove(reader);
        if self.old_readers.remove(reader) {
            return self.proceed_if_synchronized();
        }
        None
    }

    fn proceed_if_synchronized(&mut self) -> Option<Command> {
        if self.state == SegmentState::Synchronizing && self.old_readers.is_empty() {
            self.state = SegmentState::Copying;
            return Some(Command::Copy {
                key: self.key.clone(),
                target: self.build_path(),
            });
        }
        None
    }

    /// Parameter blob needed to map the segment.
    pub fn get_reset_param(&self, kind: ResetKind) -> Value {
        let path = match kind {
            ResetKind::ReadOnly => self.live_path(),
            ResetKind::Create => self.build_path(),
        };
        json!({ "mapped-file": path })
    }

    /// Test hook: look at the undispatched queue.
    #[cfg(test)]
    pub(crate) fn pending_events(&self) -> &VecDeque<SegmentEvent> {
        &self.events
    }

    /// Test hook: throw away queued work to force a quiesce path.
    #[cfg(test)]
    pub(crate) fn clear_pending(&mut self) {
        self.events.clear();
    }
}
