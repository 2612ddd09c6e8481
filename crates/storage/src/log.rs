// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL append-only event log, one file per session.
//!
//! Each line is a single [`SessionEvent`] as JSON. Appends are fsync'd
//! before returning, so a returned sequence number is durable. On open the
//! log is scanned to recover the highest committed seq; a corrupt tail
//! (torn write from a crash) is rotated to `.bak` and only the valid
//! prefix is kept.

use crate::store::StoreError;
use sb_core::SessionEvent;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Append-only per-session event log.
pub struct EventLog {
    file: File,
    path: PathBuf,
    /// Highest committed sequence number (0 when empty).
    latest_seq: u64,
}

impl EventLog {
    /// Open or create the log at `path`, recovering `latest_seq`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut latest_seq, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = path.with_extension("log.bak");
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "corrupt event log tail, rotating to .bak and keeping valid prefix",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut clean = File::create(path)?;
                for line in &valid_lines {
                    clean.write_all(line.as_bytes())?;
                    clean.write_all(b"\n")?;
                }
                clean.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
            latest_seq = Self::scan(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            latest_seq,
        })
    }

    /// Scan the log for the maximum committed seq.
    ///
    /// Returns `(max_seq, corrupt)` where `corrupt` is true if a parse
    /// error was encountered before EOF.
    fn scan(file: &File) -> Result<(u64, bool), StoreError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = 0u64;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event: SessionEvent = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            max_seq = max_seq.max(event.seq);
        }

        Ok((max_seq, corrupt))
    }

    /// All parseable lines up to the first corrupt entry.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, StoreError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if serde_json::from_str::<SessionEvent>(trimmed).is_err() {
                break;
            }

            valid.push(trimmed.to_string());
        }

        Ok(valid)
    }

    /// The next sequence number an append will commit.
    pub fn next_seq(&self) -> u64 {
        self.latest_seq + 1
    }

    /// Highest committed sequence number (0 when empty).
    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    /// Append a sequenced event and fsync.
    ///
    /// The event's `seq` must be `next_seq()`; the caller (the store)
    /// assigns it under the session lock.
    pub fn append(&mut self, event: &SessionEvent) -> Result<(), StoreError> {
        debug_assert_eq!(event.seq, self.latest_seq + 1);

        let mut json = serde_json::to_vec(event)?;
        json.push(b'\n');
        self.file.write_all(&json)?;
        self.file.sync_data()?;
        self.latest_seq = event.seq;
        Ok(())
    }

    /// Read events with `seq > from_seq` in ascending order.
    ///
    /// `limit` of 0 means unlimited.
    pub fn read_since(&self, from_seq: u64, limit: usize) -> Result<Vec<SessionEvent>, StoreError> {
        Self::read_file(&self.path, from_seq, limit)
    }

    /// Read events from a log file without an open [`EventLog`].
    ///
    /// Uses an independent read handle so concurrent appends are not
    /// blocked; a torn or corrupt line ends the read at that point, so the
    /// result is always a consistent committed prefix.
    pub fn read_file(
        path: &Path,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut events = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event: SessionEvent = match serde_json::from_str(trimmed) {
                Ok(e) => e,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "corrupt event log entry during read, stopping",
                    );
                    break;
                }
            };

            if event.seq > from_seq {
                events.push(event);
                if limit > 0 && events.len() >= limit {
                    break;
                }
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
