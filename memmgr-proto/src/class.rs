// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! DNS resource record classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Failure to interpret a string as a registered DNS class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown DNS class '{0}'")]
pub struct ClassError(pub String);

/// A registered DNS class.
///
/// Only the classes a data source can be configured for are represented;
/// mnemonics follow the IANA registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RrClass {
    In,
    Ch,
    Hs,
    None,
    Any,
}

impl RrClass {
    /// The IANA mnemonic, as used on the wire in all bus payloads.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            RrClass::In => "IN",
            RrClass::Ch => "CH",
            RrClass::Hs => "HS",
            RrClass::None => "NONE",
            RrClass::Any => "ANY",
        }
    }
}

impl fmt::Display for RrClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for RrClass {
    type Err = ClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(RrClass::In),
            "CH" => Ok(RrClass::Ch),
            "HS" => Ok(RrClass::Hs),
            "NONE" => Ok(RrClass::None),
            "ANY" => Ok(RrClass::Any),
            _ => Err(ClassError(s.to_string())),
        }
    }
}

impl TryFrom<&str> for RrClass {
    type Error = ClassError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<String> for RrClass {
    type Error = ClassError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RrClass> for String {
    fn from(class: RrClass) -> String {
        class.mnemonic().to_string()
    }
}
