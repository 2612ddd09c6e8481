// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel error kinds.

use sb_adapters::AdapterError;
use sb_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by the orchestrator and recorder.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("unknown session kind: {0}")]
    UnknownKind(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session not live: {0}")]
    SessionNotLive(String),

    /// Delete requires a stopped or idle session.
    #[error("session still running: {0}")]
    SessionRunning(String),

    /// The adapter spawned but the session could not be established
    /// (persistence failed, initial event could not be recorded).
    #[error("create failed: {0}")]
    CreateFailed(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
