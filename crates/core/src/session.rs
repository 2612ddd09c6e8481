// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records and lifecycle states.

use crate::id::SessionId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Discriminator selecting an adapter.
///
/// Open set: the built-in kinds have constructors, but any registered kind
/// string is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKind(pub String);

impl SessionKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn pty() -> Self {
        Self::new("pty")
    }

    pub fn assistant() -> Self {
        Self::new("assistant")
    }

    pub fn file_editor() -> Self {
        Self::new("file-editor")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Lifecycle state of a session.
///
/// ```text
///             create ok                stop / crash
///   (none) ─────────────▶ running ─────────────────▶ stopped
///                           │  ▲                        │
///                   suspend │  │ resume                 │ delete
///                           ▼  │                        ▼
///                          idle ──────────────────▶  (none)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Idle,
    Stopped,
}

impl SessionStatus {
    /// True while a process handle may exist.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    /// True for states `resume` accepts.
    pub fn can_resume(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Idle)
    }

    /// True for states `delete` accepts.
    pub fn can_delete(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Idle)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persisted session metadata.
///
/// The record never references runtime structures; a live process handle
/// exists only in the kernel's in-memory live-session table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub kind: SessionKind,
    pub cwd: PathBuf,
    pub status: SessionStatus,
    /// Opaque kind-specific options (shell path, env overrides, model name).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl SessionRecord {
    pub fn new(
        id: SessionId,
        kind: SessionKind,
        cwd: PathBuf,
        metadata: serde_json::Value,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            kind,
            cwd,
            status: SessionStatus::Running,
            metadata,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

/// Reason code passed to `Adapter::close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// A client or operator asked for the session to stop.
    Requested,
    /// The session is being parked as `idle`; the record survives.
    Suspend,
    /// The daemon is shutting down.
    Shutdown,
    /// The kernel is discarding a handle after a failure.
    Failed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::Suspend => "suspend",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
