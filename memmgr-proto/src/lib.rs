// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Memory manager wire vocabulary
//!
//! This crate defines the identifiers, payload structures and JSON envelopes
//! exchanged between the memory manager daemon and the segment reader
//! processes. Both sides of the protocol link against it so that a message
//! serialized by one end always deserializes on the other.

pub use crate::class::{ClassError, RrClass};
pub use crate::name::{Name, NameError};

pub mod class;
pub mod message;
pub mod name;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data source configuration generation number.
///
/// Assigned by the configuration layer each time the set of data sources is
/// reconfigured; strictly increasing across the lifetime of the cluster.
/// Every segment, reader-directed message and acknowledgment carries the
/// generation that produced it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus identity of a segment reader process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderId(String);

impl ReaderId {
    pub fn new(id: impl Into<String>) -> Self {
        ReaderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReaderId {
    fn from(id: &str) -> Self {
        ReaderId(id.to_string())
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod t_lib {
    use super::*;

    #[test]
    fn test_generation_id_is_transparent_json() {
        let gen: GenerationId = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(GenerationId(42), gen);
        assert_eq!(serde_json::json!(42), serde_json::to_value(gen).unwrap());
    }

    #[test]
    fn test_reader_id_is_transparent_json() {
        let reader: ReaderId = serde_json::from_value(serde_json::json!("reader1")).unwrap();
        assert_eq!(ReaderId::from("reader1"), reader);
        assert_eq!("reader1", reader.as_str());
    }
}
