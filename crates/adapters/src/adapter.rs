// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The adapter contract shared by every session kind.

use async_trait::async_trait;
use sb_core::{CloseReason, EventBody, SessionEvent, SessionId};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("spawn timed out after {0}ms")]
    SpawnTimeout(u64),
    #[error("resume unsupported for kind: {0}")]
    ResumeUnsupported(String),
    #[error("input sink closed")]
    ClosedSink,
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("bad operation args: {0}")]
    BadArgs(String),
}

/// Inputs to `Adapter::create`.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub session_id: SessionId,
    /// Working directory for the session process. Must exist.
    pub cwd: PathBuf,
    /// Opaque kind-specific options from the session record.
    pub metadata: serde_json::Value,
}

/// Inputs to `Adapter::resume`.
#[derive(Debug, Clone)]
pub struct ResumeSpec {
    pub session_id: SessionId,
    pub cwd: PathBuf,
    pub metadata: serde_json::Value,
    /// Highest persisted seq at resume time.
    pub last_seq: u64,
    /// The session's persisted events, for adapters that rebuild context
    /// by replay. Adapters never touch storage directly.
    pub transcript: Vec<SessionEvent>,
}

/// Channel from an adapter into the recorder pump.
///
/// Unbounded: the producing process must never stall on the kernel.
/// Backpressure is applied downstream, per subscriber.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EventBody>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventBody>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. Silently dropped once the session is torn down.
    pub fn emit(&self, body: EventBody) {
        let _ = self.tx.send(body);
    }
}

/// Opaque reference to a live process.
///
/// The adapter owns the real process state internally, keyed by session
/// id; the handle's token guards against stale handles from a previous
/// run of the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub session_id: SessionId,
    token: String,
}

impl ProcessHandle {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            token: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Kind-specific process supervision.
///
/// Contract notes:
/// - `create`/`resume` return once the process is spawned; first output
///   arrives through the sink.
/// - `close` must be idempotent, and the adapter must eventually emit a
///   terminal `status` event (`exited` or `error`) for the session.
/// - `send_input` after the process is gone fails with `ClosedSink`.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// The kind string this adapter serves (e.g. `pty`).
    fn kind(&self) -> &'static str;

    /// Spawn the backing process and start emitting events.
    async fn create(&self, spec: SpawnSpec, events: EventSink)
        -> Result<ProcessHandle, AdapterError>;

    /// Re-attach or rebuild a previously stopped session.
    async fn resume(&self, spec: ResumeSpec, events: EventSink)
        -> Result<ProcessHandle, AdapterError>;

    /// Deliver raw input to the process.
    async fn send_input(&self, handle: &ProcessHandle, bytes: &[u8]) -> Result<(), AdapterError>;

    /// Perform a kind-specific operation (`resize`, `signal`, ...).
    async fn perform(
        &self,
        handle: &ProcessHandle,
        op: &str,
        args: serde_json::Value,
    ) -> Result<(), AdapterError>;

    /// Stop the backing process. Idempotent.
    async fn close(&self, handle: &ProcessHandle, reason: CloseReason) -> Result<(), AdapterError>;
}

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;
