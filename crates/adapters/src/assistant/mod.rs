// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AI-assistant session adapter.
//!
//! Drives an assistant CLI subprocess speaking line-delimited JSON on
//! stdin/stdout. Input is a single UTF-8 string per turn; streamed output
//! is parsed by [`stream::StreamParser`] into structured events. Resume is
//! implemented by replaying the persisted conversation transcript into a
//! fresh process — there is no wire-level reconnection.

mod stream;

pub use stream::StreamParser;

use crate::adapter::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::{Channel, CloseReason, EventBody, SessionId};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PERMISSION_MODES: &[&str] = &["bypassPermissions", "default", "acceptEdits"];

/// Daemon-level assistant defaults.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Assistant executable when metadata does not name one.
    pub default_command: String,
    /// Default permission mode is `bypassPermissions` when set.
    pub bypass_permissions: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            default_command: "claude".to_string(),
            bypass_permissions: false,
        }
    }
}

/// Kind-specific options accepted in session metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AssistantMetadata {
    command: Option<String>,
    args: Vec<String>,
    model: Option<String>,
    #[serde(rename = "permission-mode", alias = "permission_mode")]
    permission_mode: Option<String>,
    env: HashMap<String, String>,
}

fn parse_metadata(value: &serde_json::Value) -> Result<AssistantMetadata, AdapterError> {
    if value.is_null() {
        return Ok(AssistantMetadata::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| AdapterError::SpawnFailed(format!("invalid assistant metadata: {}", e)))
}

struct AssistantProc {
    token: String,
    input_tx: mpsc::Sender<String>,
    events: EventSink,
    cancel: CancellationToken,
}

/// Assistant subprocess adapter.
#[derive(Clone)]
pub struct AssistantAdapter {
    config: AssistantConfig,
    procs: Arc<Mutex<HashMap<SessionId, AssistantProc>>>,
}

impl AssistantAdapter {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            procs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn permission_mode(&self, meta: &AssistantMetadata) -> Result<Option<String>, AdapterError> {
        let mode = meta.permission_mode.clone().or_else(|| {
            self.config
                .bypass_permissions
                .then(|| "bypassPermissions".to_string())
        });
        if let Some(ref mode) = mode {
            if !PERMISSION_MODES.contains(&mode.as_str()) {
                return Err(AdapterError::SpawnFailed(format!(
                    "invalid permission-mode: {}",
                    mode
                )));
            }
        }
        Ok(mode.filter(|m| m != "default"))
    }

    async fn spawn(
        &self,
        session_id: SessionId,
        cwd: &Path,
        meta: &AssistantMetadata,
        events: EventSink,
    ) -> Result<(ProcessHandle, mpsc::Sender<String>), AdapterError> {
        if !cwd.is_dir() {
            return Err(AdapterError::SpawnFailed(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }

        let program = meta
            .command
            .clone()
            .unwrap_or_else(|| self.config.default_command.clone());

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&meta.args)
            .arg("--input-format")
            .arg("stream-json")
            .arg("--output-format")
            .arg("stream-json");
        if let Some(ref model) = meta.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(mode) = self.permission_mode(meta)? {
            cmd.arg("--permission-mode").arg(mode);
        }
        cmd.current_dir(cwd)
            .envs(&meta.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AdapterError::SpawnFailed(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stdout pipe".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AdapterError::SpawnFailed("no stderr pipe".to_string()))?;

        debug!(session_id = %session_id, program = %program, "spawned assistant session");

        let (input_tx, input_rx) = mpsc::channel::<String>(64);
        let cancel = CancellationToken::new();

        spawn_stdin_writer(stdin, input_rx);
        spawn_stderr_pump(stderr, events.clone());
        spawn_supervisor(
            session_id.clone(),
            child,
            stdout,
            events.clone(),
            cancel.clone(),
            Arc::clone(&self.procs),
        );

        let handle = ProcessHandle::new(session_id.clone());
        self.procs.lock().insert(
            session_id,
            AssistantProc {
                token: handle.token().to_string(),
                input_tx: input_tx.clone(),
                events,
                cancel,
            },
        );
        Ok((handle, input_tx))
    }
}

#[async_trait]
impl Adapter for AssistantAdapter {
    fn kind(&self) -> &'static str {
        "assistant"
    }

    async fn create(
        &self,
        spec: SpawnSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        let meta = parse_metadata(&spec.metadata)?;
        let (handle, _input_tx) = self
            .spawn(spec.session_id, &spec.cwd, &meta, events)
            .await?;
        Ok(handle)
    }

    async fn resume(
        &self,
        spec: ResumeSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        let meta = parse_metadata(&spec.metadata)?;
        let (handle, input_tx) = self
            .spawn(spec.session_id.clone(), &spec.cwd, &meta, events)
            .await?;

        // Rebuild conversation context from the persisted transcript.
        let mut replayed = 0usize;
        for event in &spec.transcript {
            let role = match (event.body.channel, event.body.event_type.as_str()) {
                (Channel::AssistantMessage, "user") => "user",
                (Channel::AssistantMessage, "complete") => "assistant",
                _ => continue,
            };
            let Some(text) = event.body.payload.get("text").and_then(|t| t.as_str()) else {
                continue;
            };
            let line = serde_json::json!({
                "type": "replay",
                "role": role,
                "content": text,
            })
            .to_string();
            if input_tx.send(line).await.is_err() {
                return Err(AdapterError::SpawnFailed(
                    "assistant exited during transcript replay".to_string(),
                ));
            }
            replayed += 1;
        }

        debug!(
            session_id = %handle.session_id,
            last_seq = spec.last_seq,
            replayed,
            "assistant transcript replayed"
        );
        Ok(handle)
    }

    async fn send_input(&self, handle: &ProcessHandle, bytes: &[u8]) -> Result<(), AdapterError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| AdapterError::BadArgs("assistant input must be UTF-8".to_string()))?;

        let (input_tx, events) = {
            let procs = self.procs.lock();
            let proc = procs
                .get(&handle.session_id)
                .filter(|p| p.token == handle.token())
                .ok_or(AdapterError::ClosedSink)?;
            (proc.input_tx.clone(), proc.events.clone())
        };

        // The user turn becomes part of the persisted conversation.
        events.emit(EventBody::new(
            Channel::AssistantMessage,
            "user",
            serde_json::json!({ "text": text }),
        ));

        let line = serde_json::json!({ "type": "user", "content": text }).to_string();
        input_tx
            .send(line)
            .await
            .map_err(|_| AdapterError::ClosedSink)
    }

    async fn perform(
        &self,
        _handle: &ProcessHandle,
        op: &str,
        _args: serde_json::Value,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::UnsupportedOperation(op.to_string()))
    }

    async fn close(&self, handle: &ProcessHandle, reason: CloseReason) -> Result<(), AdapterError> {
        let cancel = {
            let procs = self.procs.lock();
            let Some(proc) = procs
                .get(&handle.session_id)
                .filter(|p| p.token == handle.token())
            else {
                return Ok(()); // already gone — idempotent
            };
            proc.cancel.clone()
        };
        debug!(session_id = %handle.session_id, reason = %reason, "closing assistant session");
        cancel.cancel();
        Ok(())
    }
}

/// Forward JSON input lines to the child's stdin.
fn spawn_stdin_writer(mut stdin: tokio::process::ChildStdin, mut input_rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(line) = input_rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdin.flush().await;
        }
    });
}

/// Forward assistant stderr as raw chunks.
fn spawn_stderr_pump(stderr: tokio::process::ChildStderr, events: EventSink) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut bytes = line.into_bytes();
            bytes.push(b'\n');
            events.emit(EventBody::output_chunk(Channel::Stderr, &bytes));
        }
    });
}

/// Parse stdout until EOF, then reap the child and emit the terminal event.
fn spawn_supervisor(
    session_id: SessionId,
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    events: EventSink,
    cancel: CancellationToken,
    procs: Arc<Mutex<HashMap<SessionId, AssistantProc>>>,
) {
    tokio::spawn(async move {
        let mut parser = StreamParser::new();
        let mut lines = BufReader::new(stdout).lines();
        let mut killed = false;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            for event in parser.feed_line(&line) {
                                events.emit(event);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "assistant stdout read failed");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled(), if !killed => {
                    killed = true;
                    let _ = child.start_kill();
                    // keep reading: drain buffered output until EOF
                }
            }
        }

        // A turn cut off mid-stream still surfaces its partial text.
        if let Some(text) = parser.take_partial() {
            events.emit(EventBody::new(
                Channel::AssistantMessage,
                "interrupted",
                serde_json::json!({ "text": text }),
            ));
        }

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "assistant wait failed");
                None
            }
        };

        debug!(session_id = %session_id, code = ?code, "assistant session exited");
        // Drop the proc entry before the terminal event so no caller can
        // race a send_input between them.
        procs.lock().remove(&session_id);
        events.emit(EventBody::exited(code, None));
    });
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
