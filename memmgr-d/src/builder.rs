// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Builder worker thread.
//!
//! The builder owns all segment I/O so the coordinator never blocks on disk.
//! It drains the command queue in FIFO order and reports every outcome as a
//! notification; a `cancel` can therefore never overtake work queued before
//! it for the same generation.

use crate::builder_channel::{BuilderChannel, Command, Notification};
use memmgr_proto::{GenerationId, Name};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Storage backend the builder resolves commands against.
///
/// The real zone loader plugs in here; the shipped [`MappedFiles`] store
/// covers file lifecycle only. Injected so tests can script outcomes.
pub trait SegmentStore {
    /// Integrity-check an existing mapped file.
    fn validate(&mut self, target: &Path, generation: GenerationId) -> bool;

    /// (Re)build the mapped file at `target`, optionally for one zone only.
    fn load(&mut self, target: &Path, generation: GenerationId, origin: Option<&Name>) -> bool;

    /// Discard partial work for a superseded generation.
    fn cancel(&mut self, generation: GenerationId);
}

/// Magic prefix of a mapped segment file header.
const SEGMENT_MAGIC: &[u8; 8] = b"ZSEGMT01";

/// Mapped-file store: creates and checks segment file headers.
///
/// Zone records are the zone loader's business; this store owns only the
/// on-disk lifecycle the coordinator observes (existence, header, paths).
#[derive(Debug, Default)]
pub struct MappedFiles;

impl MappedFiles {
    fn header(generation: GenerationId) -> Vec<u8> {
        let mut header = SEGMENT_MAGIC.to_vec();
        header.extend_from_slice(&generation.0.to_le_bytes());
        header
    }
}

impl SegmentStore for MappedFiles {
    fn validate(&mut self, target: &Path, generation: GenerationId) -> bool {
        match std::fs::read(target) {
            Ok(contents) => contents.starts_with(&Self::header(generation)),
            Err(e) => {
                debug!("mapped file {} not usable: {}", target.display(), e);
                false
            }
        }
    }

    fn load(&mut self, target: &Path, generation: GenerationId, origin: Option<&Name>) -> bool {
        match origin {
            Some(origin) => debug!("rebuilding zone {} in {}", origin, target.display()),
            None => debug!("rebuilding {}", target.display()),
        }
        match std::fs::write(target, Self::header(generation)) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to write mapped file {}: {}", target.display(), e);
                false
            }
        }
    }

    fn cancel(&mut self, generation: GenerationId) {
        // FIFO already guarantees no queued work for the generation remains
        debug!("cancelled generation {generation}");
    }
}

/// Entry point to the builder thread.
pub fn run(channel: Arc<BuilderChannel>, mut store: impl SegmentStore) {
    info!("starting segment builder thread");
    loop {
        match channel.wait_command() {
            Command::Validate { key, target } => {
                let succeeded = store.validate(&target, key.generation);
                debug!("validated segment {key}: {succeeded}");
                channel.push_notification(Notification::ValidateCompleted { key, succeeded });
            }
            Command::Load {
                key,
                origin,
                target,
            } => {
                let succeeded = store.load(&target, key.generation, origin.as_ref());
                debug!("loaded segment {key}: {succeeded}");
                channel.push_notification(Notification::LoadCompleted { key, succeeded });
            }
            Command::Copy { key, target } => {
                let succeeded = store.load(&target, key.generation, None);
                debug!("copied segment {key}: {succeeded}");
                channel.push_notification(Notification::LoadCompleted { key, succeeded });
            }
            Command::Cancel { generation } => {
                store.cancel(generation);
                channel.push_notification(Notification::CancelCompleted { generation });
            }
            Command::Shutdown => break,
        }
    }
    info!("segment builder thread exiting");
}
