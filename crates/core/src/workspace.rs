// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace display records.
//!
//! A workspace groups sessions by working directory. The kernel only
//! resolves default cwds from it and records last-active times; everything
//! else about workspaces is owned by collaborators.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Path-keyed workspace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    /// Absolute path; primary key.
    pub path: PathBuf,
    /// User-visible display name (defaults to the directory basename).
    pub name: String,
    #[serde(default)]
    pub last_active_at_ms: u64,
}

impl WorkspaceRecord {
    pub fn new(path: PathBuf, now_ms: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            last_active_at_ms: now_ms,
        }
    }
}
