// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, append-only, per-session event store.
//!
//! On disk each session owns a directory under `<root>/sessions/<id>/`
//! holding `session.json` (metadata, written atomically via tmp + rename)
//! and `events.log` (the JSONL event log). Appends within one session are
//! serialized by a per-session mutex; reads use independent file handles
//! and never block writes.

use crate::log::EventLog;
use parking_lot::{Mutex, RwLock};
use sb_core::{EventBody, SessionEvent, SessionId, SessionRecord, SessionStatus};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already exists: {0}")]
    SessionExists(String),
}

struct SessionSlot {
    record: Mutex<SessionRecord>,
    log: Mutex<EventLog>,
    log_path: PathBuf,
}

/// The event store: session metadata plus per-session event logs.
pub struct EventStore {
    root: PathBuf,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl EventStore {
    /// Open the store rooted at `root`, loading every persisted session.
    ///
    /// Sessions with unreadable metadata are rotated to `.bak` and skipped
    /// so one corrupt record cannot keep the daemon down.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let sessions_dir = root.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;

        let mut sessions = HashMap::new();
        for entry in std::fs::read_dir(&sessions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let dir = entry.path();
            let meta_path = dir.join("session.json");
            let record: SessionRecord = match load_json(&meta_path) {
                Ok(Some(r)) => r,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %meta_path.display(), error = %e, "skipping unreadable session record");
                    continue;
                }
            };

            let log_path = dir.join("events.log");
            let log = EventLog::open(&log_path)?;
            sessions.insert(
                record.id.clone(),
                Arc::new(SessionSlot {
                    record: Mutex::new(record),
                    log: Mutex::new(log),
                    log_path,
                }),
            );
        }

        Ok(Self {
            root: root.to_owned(),
            sessions: RwLock::new(sessions),
        })
    }

    fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join("sessions").join(id.as_str())
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, StoreError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// Persist a new session record and create its event log.
    pub fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let dir = self.session_dir(&id);

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&id) {
            return Err(StoreError::SessionExists(id.to_string()));
        }

        std::fs::create_dir_all(&dir)?;
        save_json(&dir.join("session.json"), &record)?;

        let log_path = dir.join("events.log");
        let log = EventLog::open(&log_path)?;
        sessions.insert(
            id,
            Arc::new(SessionSlot {
                record: Mutex::new(record),
                log: Mutex::new(log),
                log_path,
            }),
        );
        Ok(())
    }

    pub fn find_by_id(&self, id: &SessionId) -> Option<SessionRecord> {
        let slot = self.sessions.read().get(id).cloned()?;
        let record = slot.record.lock().clone();
        Some(record)
    }

    /// All session records, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        let slots: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut records: Vec<_> = slots.iter().map(|s| s.record.lock().clone()).collect();
        records.sort_by_key(|r| (r.created_at_ms, r.id.to_string()));
        records
    }

    pub fn list_by_cwd(&self, cwd: &Path) -> Vec<SessionRecord> {
        self.list_sessions()
            .into_iter()
            .filter(|r| r.cwd == cwd)
            .collect()
    }

    /// Update a session's status, bumping `updated_at_ms`.
    pub fn update_status(
        &self,
        id: &SessionId,
        status: SessionStatus,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let slot = self.slot(id)?;
        let mut record = slot.record.lock();
        record.status = status;
        record.updated_at_ms = now_ms;
        save_json(&self.session_dir(id).join("session.json"), &*record)
    }

    /// Append an event, assigning the next sequence number.
    ///
    /// The returned `seq` is durable (fsync'd) when this returns. Appends
    /// within one session are serialized here; the recorder additionally
    /// holds its own per-session lock around append + notify.
    pub fn append(
        &self,
        id: &SessionId,
        body: EventBody,
        timestamp_ms: u64,
    ) -> Result<u64, StoreError> {
        let slot = self.slot(id)?;
        let mut log = slot.log.lock();
        let seq = log.next_seq();
        let event = SessionEvent::new(id.clone(), seq, body, timestamp_ms);
        log.append(&event)?;
        Ok(seq)
    }

    /// Events with `seq > from_seq`, ascending; `limit` 0 means unlimited.
    ///
    /// Reads an independent file handle, so concurrent appends are not
    /// blocked; the result is a consistent committed prefix.
    pub fn events_since(
        &self,
        id: &SessionId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let slot = self.slot(id)?;
        EventLog::read_file(&slot.log_path, from_seq, limit)
    }

    /// Highest committed seq for the session (0 if no events).
    pub fn latest_seq(&self, id: &SessionId) -> Result<u64, StoreError> {
        let slot = self.slot(id)?;
        let log = slot.log.lock();
        Ok(log.latest_seq())
    }

    /// Purge a session: its record, its events, its directory.
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let removed = self.sessions.write().remove(id);
        if removed.is_none() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        let dir = self.session_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Save JSON atomically: write to `.tmp`, fsync, rename.
pub(crate) fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load JSON; a corrupt file is rotated to `.bak` and treated as absent.
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let bak_path = path.with_extension("json.bak");
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                error = %e,
                "corrupt JSON file, rotating to .bak",
            );
            std::fs::rename(path, &bak_path)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
