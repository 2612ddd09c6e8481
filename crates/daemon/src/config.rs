// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration, read once at startup from a TOML file.

use sb_core::SessionKind;
use sb_kernel::ScheduledJob;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A declared periodic job (`[[schedule]]` table in the config file).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub name: String,
    pub every_secs: u64,
    pub kind: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub input: Option<String>,
}

/// Recognized daemon options; unspecified fields take defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen port for the WebSocket transport.
    pub port: u16,
    /// Default cwd prefix when a create request names none.
    pub workspaces_root: PathBuf,
    /// Event purge horizon for stopped sessions.
    pub retention_days: u32,
    /// Per-subscriber fan-out queue bound.
    pub max_subscriber_queue: usize,
    pub spawn_timeout_ms: u64,
    pub heartbeat_ms: u64,
    pub pong_deadline_ms: u64,
    /// Shell for PTY sessions; falls back to `$SHELL`, then `/bin/sh`.
    pub default_shell: Option<String>,
    /// Assistant sessions default to `permission-mode: bypassPermissions`.
    pub bypass_permissions: bool,
    /// State directory override; defaults to the XDG state dir.
    pub state_dir: Option<PathBuf>,
    /// Transport auth token. With none configured every attach is rejected.
    pub auth_token: Option<String>,
    #[serde(rename = "schedule")]
    pub schedules: Vec<ScheduleEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8722,
            workspaces_root: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            retention_days: 14,
            max_subscriber_queue: 1024,
            spawn_timeout_ms: 10_000,
            heartbeat_ms: 20_000,
            pong_deadline_ms: 30_000,
            default_shell: None,
            bypass_permissions: false,
            state_dir: None,
            auth_token: None,
            schedules: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_owned(),
                    source: e,
                })
            }
        };
        Ok(toml::from_str(&text)?)
    }

    pub fn spawn_timeout(&self) -> Duration {
        Duration::from_millis(self.spawn_timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn pong_deadline(&self) -> Duration {
        Duration::from_millis(self.pong_deadline_ms)
    }

    /// Schedule entries as kernel jobs.
    pub fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        self.schedules
            .iter()
            .map(|entry| ScheduledJob {
                name: entry.name.clone(),
                every: Duration::from_secs(entry.every_secs),
                kind: SessionKind::new(&entry.kind),
                cwd: entry.cwd.clone(),
                metadata: entry.metadata.clone(),
                input: entry.input.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
