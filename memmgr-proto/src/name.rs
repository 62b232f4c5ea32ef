// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Validated domain names in presentation format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted presentation form, dots included.
const MAX_NAME_LEN: usize = 253;

/// Longest accepted single label.
const MAX_LABEL_LEN: usize = 63;

/// Failure to interpret a string as a domain name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("empty name")]
    Empty,
    #[error("empty label")]
    EmptyLabel,
    #[error("label longer than {MAX_LABEL_LEN} characters")]
    LabelTooLong,
    #[error("name longer than {MAX_NAME_LEN} characters")]
    TooLong,
    #[error("character '{0}' not allowed in a name")]
    BadCharacter(char),
}

/// A domain name, held in canonical (lower-case, no trailing dot) form.
///
/// The root name is the single dot. A trailing dot on input is accepted and
/// stripped; comparison and hashing operate on the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(String);

impl Name {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    fn parse(s: &str) -> Result<Name, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty);
        }
        let lowered = s.to_ascii_lowercase();
        if lowered == "." {
            return Ok(Name(lowered));
        }
        let canonical = lowered.strip_suffix('.').unwrap_or(&lowered);
        if canonical.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        for label in canonical.split('.') {
            if label.is_empty() {
                return Err(NameError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(NameError::LabelTooLong);
            }
            for c in label.chars() {
                if !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '*') {
                    return Err(NameError::BadCharacter(c));
                }
            }
        }
        Ok(Name(canonical.to_string()))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::parse(s)
    }
}

impl TryFrom<&str> for Name {
    type Error = NameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Name::parse(s)
    }
}

impl TryFrom<String> for Name {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Name::parse(&s)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> String {
        name.0
    }
}
