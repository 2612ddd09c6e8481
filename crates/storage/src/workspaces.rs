// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace index: one atomic JSON file of path-keyed records.

use crate::store::{load_json, save_json, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sb_core::WorkspaceRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    workspaces: Vec<WorkspaceRecord>,
}

/// Path-keyed workspace records with write-through persistence.
pub struct WorkspaceIndex {
    path: PathBuf,
    records: Mutex<HashMap<PathBuf, WorkspaceRecord>>,
}

impl WorkspaceIndex {
    /// Load the index from `path`, or start empty if absent/corrupt.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file: IndexFile = load_json(path)?.unwrap_or_default();
        let records = file
            .workspaces
            .into_iter()
            .map(|w| (w.path.clone(), w))
            .collect();
        Ok(Self {
            path: path.to_owned(),
            records: Mutex::new(records),
        })
    }

    /// Record activity in a workspace, creating the record on first use.
    pub fn touch(&self, workspace: &Path, now_ms: u64) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        records
            .entry(workspace.to_owned())
            .or_insert_with(|| WorkspaceRecord::new(workspace.to_owned(), now_ms))
            .last_active_at_ms = now_ms;
        self.save(&records)
    }

    pub fn get(&self, workspace: &Path) -> Option<WorkspaceRecord> {
        self.records.lock().get(workspace).cloned()
    }

    /// All records, most recently active first.
    pub fn list(&self) -> Vec<WorkspaceRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by(|a, b| b.last_active_at_ms.cmp(&a.last_active_at_ms));
        records
    }

    fn save(&self, records: &HashMap<PathBuf, WorkspaceRecord>) -> Result<(), StoreError> {
        let file = IndexFile {
            saved_at: Some(Utc::now()),
            workspaces: records.values().cloned().collect(),
        };
        save_json(&self.path, &file)
    }
}

#[cfg(test)]
#[path = "workspaces_tests.rs"]
mod tests;
