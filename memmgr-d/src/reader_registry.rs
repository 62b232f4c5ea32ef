// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Subscribed readers and their outstanding update counts.
//!
//! Membership is tracked apart from the per-segment reader sets so a newly
//! built generation can project the full reader set onto each of its
//! segments. The counters support the two-in-flight case where the same
//! segment is published again before the previous update was acknowledged:
//! a reader counts as synchronized only when its count returns to zero.

use crate::datasrc_info::SegmentKey;
use memmgr_proto::ReaderId;
use std::collections::HashMap;

/// Result of applying one `segment_info_update_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Reader not registered, or no outstanding update for the segment.
    /// The ack is dropped without touching any counter.
    Unknown,
    /// More updates are still in flight for this reader and segment.
    Outstanding(u32),
    /// The count reached zero; the reader is synchronized.
    Synchronized,
}

#[derive(Debug, Default)]
pub struct ReaderRegistry {
    readers: HashMap<ReaderId, HashMap<SegmentKey, u32>>,
}

impl ReaderRegistry {
    /// Add a reader; false if it was already present (duplicate subscribe).
    pub fn register(&mut self, reader: &ReaderId) -> bool {
        if self.readers.contains_key(reader) {
            return false;
        }
        self.readers.insert(reader.clone(), HashMap::new());
        true
    }

    /// Drop a reader and all its counters; false if it was not registered.
    pub fn deregister(&mut self, reader: &ReaderId) -> bool {
        self.readers.remove(reader).is_some()
    }

    pub fn contains(&self, reader: &ReaderId) -> bool {
        self.readers.contains_key(reader)
    }

    pub fn readers(&self) -> impl Iterator<Item = &ReaderId> {
        self.readers.keys()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Record one `segment_info_update` sent to `reader`.
    pub fn note_update_sent(&mut self, reader: &ReaderId, key: &SegmentKey) {
        if let Some(counts) = self.readers.get_mut(reader) {
            *counts.entry(key.clone()).or_insert(0) += 1;
        }
    }

    /// Outstanding updates for one reader and segment.
    pub fn outstanding(&self, reader: &ReaderId, key: &SegmentKey) -> u32 {
        self.readers
            .get(reader)
            .and_then(|counts| counts.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Apply one acknowledgment. The zero entry is removed so a later stray
    /// ack for the same segment is reported as unknown rather than counted.
    pub fn ack_update(&mut self, reader: &ReaderId, key: &SegmentKey) -> AckOutcome {
        let Some(counts) = self.readers.get_mut(reader) else {
            return AckOutcome::Unknown;
        };
        let Some(count) = counts.get_mut(key) else {
            return AckOutcome::Unknown;
        };
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
            AckOutcome::Synchronized
        } else {
            AckOutcome::Outstanding(*count)
        }
    }
}
