// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Per-generation snapshot of all mapped segments.

use crate::builder_channel::Command;
use crate::segment_info::SegmentInfo;
use memmgr_proto::{GenerationId, ReaderId, RrClass};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Identity of one segment: generation, class and data source name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentKey {
    pub generation: GenerationId,
    pub class: RrClass,
    pub name: String,
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@gen{}", self.class, self.name, self.generation)
    }
}

/// All segments created for one configuration generation, plus the union of
/// readers referencing any of them. Retired generations linger in the
/// coordinator's old-generation table until the builder has acknowledged the
/// cancel and the reader union is empty.
pub struct DataSrcInfo {
    generation: GenerationId,
    segments: BTreeMap<(RrClass, String), SegmentInfo>,
    all_readers: BTreeSet<ReaderId>,
    cancel_completed: bool,
}

impl DataSrcInfo {
    /// Build the segment set for `generation` from the cache-enabled
    /// (class, name) pairs of the configuration.
    pub fn new(
        generation: GenerationId,
        cached: impl IntoIterator<Item = (RrClass, String)>,
        mapped_file_dir: &Path,
    ) -> Self {
        let segments = cached
            .into_iter()
            .map(|(class, name)| {
                let key = SegmentKey {
                    generation,
                    class,
                    name: name.clone(),
                };
                ((class, name), SegmentInfo::new(key, mapped_file_dir))
            })
            .collect();
        DataSrcInfo {
            generation,
            segments,
            all_readers: BTreeSet::new(),
            cancel_completed: false,
        }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, class: RrClass, name: &str) -> Option<&SegmentInfo> {
        self.segments.get(&(class, name.to_string()))
    }

    pub fn segment_mut(&mut self, class: RrClass, name: &str) -> Option<&mut SegmentInfo> {
        self.segments.get_mut(&(class, name.to_string()))
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentInfo> {
        self.segments.values()
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut SegmentInfo> {
        self.segments.values_mut()
    }

    /// Readers referencing any segment of this generation.
    pub fn all_readers(&self) -> &BTreeSet<ReaderId> {
        &self.all_readers
    }

    /// Record that a reader references this generation.
    pub fn note_reader(&mut self, reader: ReaderId) {
        self.all_readers.insert(reader);
    }

    /// Whether the builder has acknowledged cancellation of this generation.
    pub fn cancel_completed(&self) -> bool {
        self.cancel_completed
    }

    pub fn mark_cancel_completed(&mut self) {
        self.cancel_completed = true;
    }

    /// Remove a reader from every segment of a live generation; follow-up
    /// commands from segments it was blocking are returned for dispatch.
    pub fn remove_reader(&mut self, reader: &ReaderId) -> Vec<Command> {
        let commands = self
            .segments
            .values_mut()
            .filter_map(|segment| segment.remove_reader(reader))
            .collect();
        self.all_readers.remove(reader);
        commands
    }

    /// Detach a reader during retirement. Follow-up work has no value for a
    /// superseded generation and is discarded; the remaining holders are
    /// returned so the caller can decide whether the generation is done.
    pub fn cancel(&mut self, reader: &ReaderId) -> &BTreeSet<ReaderId> {
        for segment in self.segments.values_mut() {
            let _ = segment.remove_reader(reader);
        }
        self.all_readers.remove(reader);
        &self.all_readers
    }
}
