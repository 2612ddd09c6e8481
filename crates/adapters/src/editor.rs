// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-editor session adapter.
//!
//! Stateless: a session is just an editing context rooted at the session
//! cwd. There is no backing process — operations execute synchronously and
//! emit `tool-call` / `tool-result` event pairs describing file reads and
//! writes. Paths are confined to the session root.

use crate::adapter::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::{Channel, CloseReason, EventBody, SessionId};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

struct EditorCtx {
    token: String,
    root: PathBuf,
    events: EventSink,
}

/// Stateless file-editing adapter.
#[derive(Clone, Default)]
pub struct EditorAdapter {
    ctxs: Arc<Mutex<HashMap<SessionId, EditorCtx>>>,
}

impl EditorAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn ctx(&self, handle: &ProcessHandle) -> Result<(PathBuf, EventSink), AdapterError> {
        let ctxs = self.ctxs.lock();
        let ctx = ctxs
            .get(&handle.session_id)
            .filter(|c| c.token == handle.token())
            .ok_or(AdapterError::ClosedSink)?;
        Ok((ctx.root.clone(), ctx.events.clone()))
    }
}

/// Resolve `rel` under `root`, rejecting absolute paths and `..` escapes.
fn resolve_path(root: &Path, rel: &str) -> Result<PathBuf, AdapterError> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(AdapterError::BadArgs(format!(
            "path must be relative to the session root: {}",
            rel
        )));
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(AdapterError::BadArgs(format!(
                    "path escapes the session root: {}",
                    rel
                )))
            }
        }
    }
    Ok(root.join(rel_path))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Adapter for EditorAdapter {
    fn kind(&self) -> &'static str {
        "file-editor"
    }

    async fn create(
        &self,
        spec: SpawnSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        if !spec.cwd.is_dir() {
            return Err(AdapterError::SpawnFailed(format!(
                "working directory does not exist: {}",
                spec.cwd.display()
            )));
        }

        let handle = ProcessHandle::new(spec.session_id.clone());
        self.ctxs.lock().insert(
            spec.session_id,
            EditorCtx {
                token: handle.token().to_string(),
                root: spec.cwd,
                events,
            },
        );
        Ok(handle)
    }

    async fn resume(
        &self,
        spec: ResumeSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        // Nothing to restart; a fresh context over the same root suffices.
        self.create(
            SpawnSpec {
                session_id: spec.session_id,
                cwd: spec.cwd,
                metadata: spec.metadata,
            },
            events,
        )
        .await
    }

    async fn send_input(&self, _handle: &ProcessHandle, _bytes: &[u8]) -> Result<(), AdapterError> {
        // There is no process sink; all interaction happens via operations.
        Err(AdapterError::UnsupportedOperation("input".to_string()))
    }

    async fn perform(
        &self,
        handle: &ProcessHandle,
        op: &str,
        args: serde_json::Value,
    ) -> Result<(), AdapterError> {
        let (root, events) = self.ctx(handle)?;

        match op {
            "read" => {
                let read: ReadArgs = serde_json::from_value(args)
                    .map_err(|e| AdapterError::BadArgs(e.to_string()))?;
                let path = resolve_path(&root, &read.path)?;

                events.emit(EventBody::new(
                    Channel::ToolCall,
                    "call",
                    serde_json::json!({ "op": "read", "path": read.path }),
                ));

                let bytes = std::fs::read(&path).map_err(|e| {
                    AdapterError::BadArgs(format!("read {}: {}", read.path, e))
                })?;
                events.emit(EventBody::new(
                    Channel::ToolResult,
                    "result",
                    serde_json::json!({
                        "op": "read",
                        "path": read.path,
                        "content": String::from_utf8_lossy(&bytes),
                        "bytes": bytes.len(),
                        "sha256": sha256_hex(&bytes),
                    }),
                ));
                Ok(())
            }

            "write" => {
                let write: WriteArgs = serde_json::from_value(args)
                    .map_err(|e| AdapterError::BadArgs(e.to_string()))?;
                let path = resolve_path(&root, &write.path)?;

                events.emit(EventBody::new(
                    Channel::ToolCall,
                    "call",
                    serde_json::json!({ "op": "write", "path": write.path }),
                ));

                let previous_sha256 = std::fs::read(&path).ok().map(|b| sha256_hex(&b));
                let created = previous_sha256.is_none();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AdapterError::BadArgs(format!("write {}: {}", write.path, e))
                    })?;
                }
                std::fs::write(&path, write.content.as_bytes()).map_err(|e| {
                    AdapterError::BadArgs(format!("write {}: {}", write.path, e))
                })?;

                events.emit(EventBody::new(
                    Channel::ToolResult,
                    "result",
                    serde_json::json!({
                        "op": "write",
                        "path": write.path,
                        "bytes_written": write.content.len(),
                        "created": created,
                        "sha256": sha256_hex(write.content.as_bytes()),
                        "previous_sha256": previous_sha256,
                    }),
                ));
                Ok(())
            }

            other => Err(AdapterError::UnsupportedOperation(other.to_string())),
        }
    }

    async fn close(&self, handle: &ProcessHandle, reason: CloseReason) -> Result<(), AdapterError> {
        let removed = {
            let mut ctxs = self.ctxs.lock();
            match ctxs.get(&handle.session_id) {
                Some(ctx) if ctx.token == handle.token() => ctxs.remove(&handle.session_id),
                _ => None,
            }
        };
        if let Some(ctx) = removed {
            debug!(session_id = %handle.session_id, reason = %reason, "closing editor session");
            ctx.events.emit(EventBody::exited(Some(0), None));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "editor_tests.rs"]
mod tests;
