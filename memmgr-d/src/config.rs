// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Runtime configuration of the coordinator.

use nix::unistd::{access, AccessFlags};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where mapped segment files live unless the configuration says otherwise.
pub const DEFAULT_MAPPED_FILE_DIR: &str = "/var/lib/memmgr/mapped_files";

/// Rejection of a proposed configuration. The messages are part of the
/// operator surface; reconfiguration answers carry them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigRejected {
    #[error("mapped_file_dir {0}: not a directory")]
    NotADirectory(String),
    #[error("mapped_file_dir {0}: not writable")]
    NotWritable(String),
}

/// Validated configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigParams {
    pub mapped_file_dir: PathBuf,
}

/// Check that `dir` exists, is a directory, and is writable by this process.
///
/// Writability is an access(2) probe. For a privileged process the probe
/// succeeds regardless of file modes, so running the daemon as root weakens
/// this check to existence only.
pub fn check_mapped_file_dir(dir: &Path) -> Result<(), ConfigRejected> {
    if !dir.is_dir() {
        return Err(ConfigRejected::NotADirectory(dir.display().to_string()));
    }
    if access(dir, AccessFlags::W_OK).is_err() {
        return Err(ConfigRejected::NotWritable(dir.display().to_string()));
    }
    Ok(())
}
