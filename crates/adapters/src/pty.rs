// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY session adapter.
//!
//! Spawns a login shell (or an explicit command) inside a pseudo-terminal.
//! The TTY merges stderr into stdout, so all output lands on the `stdout`
//! channel as base64 chunks. Input is raw bytes; the terminal itself
//! provides echo, so no explicit `stdin-echo` events are emitted.

use crate::adapter::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use sb_core::{Channel, CloseReason, EventBody, SessionId};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// EOT (Ctrl-D): asks an interactive shell to exit cleanly.
const EOT: u8 = 0x04;

/// Grace period between a close request and force-kill.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Read chunk size for the PTY master.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Defaults applied when session metadata leaves them out.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Shell to spawn when metadata names neither `shell` nor `command`.
    /// Falls back to `$SHELL`, then `/bin/sh`.
    pub default_shell: Option<String>,
    pub default_cols: u16,
    pub default_rows: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_cols: 80,
            default_rows: 24,
        }
    }
}

impl PtyConfig {
    fn shell(&self) -> String {
        self.default_shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Kind-specific options accepted in session metadata.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct PtyMetadata {
    shell: Option<String>,
    /// Explicit command to run instead of a shell.
    command: Option<String>,
    args: Vec<String>,
    env: HashMap<String, String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

fn parse_metadata(value: &serde_json::Value) -> Result<PtyMetadata, AdapterError> {
    if value.is_null() {
        return Ok(PtyMetadata::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| AdapterError::SpawnFailed(format!("invalid pty metadata: {}", e)))
}

struct PtyProc {
    token: String,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    input_tx: mpsc::Sender<Vec<u8>>,
    events: EventSink,
    child_pid: Option<u32>,
}

/// PTY-backed session adapter.
#[derive(Clone)]
pub struct PtyAdapter {
    config: PtyConfig,
    procs: Arc<Mutex<HashMap<SessionId, PtyProc>>>,
}

impl PtyAdapter {
    pub fn new(config: PtyConfig) -> Self {
        Self {
            config,
            procs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_proc<T>(
        &self,
        handle: &ProcessHandle,
        f: impl FnOnce(&mut PtyProc) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        let mut procs = self.procs.lock();
        let proc = procs
            .get_mut(&handle.session_id)
            .filter(|p| p.token == handle.token())
            .ok_or(AdapterError::ClosedSink)?;
        f(proc)
    }
}

#[async_trait]
impl Adapter for PtyAdapter {
    fn kind(&self) -> &'static str {
        "pty"
    }

    async fn create(
        &self,
        spec: SpawnSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        let meta = parse_metadata(&spec.metadata)?;

        // Precondition: cwd must exist
        if !spec.cwd.is_dir() {
            return Err(AdapterError::SpawnFailed(format!(
                "working directory does not exist: {}",
                spec.cwd.display()
            )));
        }

        let size = PtySize {
            rows: meta.rows.unwrap_or(self.config.default_rows),
            cols: meta.cols.unwrap_or(self.config.default_cols),
            pixel_width: 0,
            pixel_height: 0,
        };

        let pty = native_pty_system();
        let pair = pty
            .openpty(size)
            .map_err(|e| AdapterError::SpawnFailed(e.to_string()))?;

        let program = meta
            .command
            .clone()
            .or_else(|| meta.shell.clone())
            .unwrap_or_else(|| self.config.shell());
        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&meta.args);
        cmd.cwd(&spec.cwd);
        // Process env extended by metadata.env
        for (key, value) in &meta.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| AdapterError::SpawnFailed(e.to_string()))?;
        // The child holds the only remaining slave handle; keeping ours open
        // would stop the master reader from ever seeing EOF.
        drop(pair.slave);

        let killer = child.clone_killer();
        let child_pid = child.process_id();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AdapterError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AdapterError::SpawnFailed(e.to_string()))?;

        debug!(
            session_id = %spec.session_id,
            program = %program,
            pid = ?child_pid,
            "spawned pty session"
        );

        let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(64);
        spawn_writer(writer, input_rx);
        spawn_supervisor(
            spec.session_id.clone(),
            reader,
            child,
            events.clone(),
            Arc::clone(&self.procs),
        );

        let handle = ProcessHandle::new(spec.session_id.clone());
        self.procs.lock().insert(
            spec.session_id,
            PtyProc {
                token: handle.token().to_string(),
                master: pair.master,
                killer,
                input_tx,
                events,
                child_pid,
            },
        );
        Ok(handle)
    }

    async fn resume(
        &self,
        _spec: ResumeSpec,
        _events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        // A dead terminal cannot be re-attached; the scrollback lives in
        // the event log and is available via replay.
        Err(AdapterError::ResumeUnsupported("pty".to_string()))
    }

    async fn send_input(&self, handle: &ProcessHandle, bytes: &[u8]) -> Result<(), AdapterError> {
        let input_tx = self.with_proc(handle, |p| Ok(p.input_tx.clone()))?;
        input_tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| AdapterError::ClosedSink)
    }

    async fn perform(
        &self,
        handle: &ProcessHandle,
        op: &str,
        args: serde_json::Value,
    ) -> Result<(), AdapterError> {
        match op {
            "resize" => {
                #[derive(Deserialize)]
                struct ResizeArgs {
                    cols: u16,
                    rows: u16,
                }
                let resize: ResizeArgs = serde_json::from_value(args)
                    .map_err(|e| AdapterError::BadArgs(e.to_string()))?;

                self.with_proc(handle, |p| {
                    p.master
                        .resize(PtySize {
                            rows: resize.rows,
                            cols: resize.cols,
                            pixel_width: 0,
                            pixel_height: 0,
                        })
                        .map_err(|e| AdapterError::BadArgs(e.to_string()))?;
                    p.events.emit(EventBody::new(
                        Channel::Resize,
                        "resize",
                        serde_json::json!({ "cols": resize.cols, "rows": resize.rows }),
                    ));
                    Ok(())
                })
            }

            "signal" => {
                #[derive(Deserialize)]
                struct SignalArgs {
                    name: String,
                }
                let signal: SignalArgs = serde_json::from_value(args)
                    .map_err(|e| AdapterError::BadArgs(e.to_string()))?;
                let sig = parse_signal(&signal.name)
                    .ok_or_else(|| AdapterError::BadArgs(format!("unknown signal: {}", signal.name)))?;

                let pid = self.with_proc(handle, |p| {
                    p.child_pid
                        .ok_or_else(|| AdapterError::BadArgs("process id unavailable".to_string()))
                })?;
                send_signal(pid, sig)
            }

            other => Err(AdapterError::UnsupportedOperation(other.to_string())),
        }
    }

    async fn close(&self, handle: &ProcessHandle, reason: CloseReason) -> Result<(), AdapterError> {
        // Idempotent: a session the supervisor already reaped is a no-op.
        let (input_tx, mut killer, child_pid) = {
            let mut procs = self.procs.lock();
            let Some(proc) = procs
                .get_mut(&handle.session_id)
                .filter(|p| p.token == handle.token())
            else {
                return Ok(());
            };
            (proc.input_tx.clone(), proc.killer.clone_killer(), proc.child_pid)
        };

        debug!(session_id = %handle.session_id, reason = %reason, "closing pty session");

        if reason == CloseReason::Failed {
            // No grace for a handle the kernel is discarding after a failure
            if let Err(e) = killer.kill() {
                debug!(session_id = %handle.session_id, error = %e, "pty kill (already exited?)");
            }
            return Ok(());
        }

        // Graceful path: EOT lets an interactive shell exit 0. The
        // supervisor emits the terminal exited event once the child dies;
        // a force-kill backstop covers processes that ignore EOF.
        let _ = input_tx.send(vec![EOT]).await;

        let procs = Arc::clone(&self.procs);
        let session_id = handle.session_id.clone();
        let token = handle.token().to_string();
        tokio::spawn(async move {
            tokio::time::sleep(CLOSE_GRACE).await;
            let still_alive = procs
                .lock()
                .get(&session_id)
                .map(|p| p.token == token)
                .unwrap_or(false);
            if still_alive {
                warn!(session_id = %session_id, "pty did not exit after close, force-killing");
                if let Some(pid) = child_pid {
                    let _ = send_signal(pid, nix::sys::signal::Signal::SIGHUP);
                }
                if let Err(e) = killer.kill() {
                    debug!(session_id = %session_id, error = %e, "pty force-kill");
                }
            }
        });

        Ok(())
    }
}

/// Consume input frames on a blocking task that owns the PTY writer.
fn spawn_writer(
    mut writer: Box<dyn std::io::Write + Send>,
    mut input_rx: mpsc::Receiver<Vec<u8>>,
) {
    tokio::task::spawn_blocking(move || {
        while let Some(bytes) = input_rx.blocking_recv() {
            if writer.write_all(&bytes).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });
}

/// Read the PTY until EOF, then reap the child and emit the terminal event.
///
/// Running read-then-wait on one task guarantees every buffered output
/// chunk is emitted before `status:exited`.
fn spawn_supervisor(
    session_id: SessionId,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    events: EventSink,
    procs: Arc<Mutex<HashMap<SessionId, PtyProc>>>,
) {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => events.emit(EventBody::output_chunk(Channel::Stdout, &buf[..n])),
                // EIO is the normal Linux EOF for a pty master
                Err(_) => break,
            }
        }

        let code = match child.wait() {
            Ok(status) => Some(status.exit_code() as i32),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "pty wait failed");
                None
            }
        };

        debug!(session_id = %session_id, code = ?code, "pty session exited");
        // Drop the proc entry before the terminal event so no caller can
        // race a send_input between them.
        procs.lock().remove(&session_id);
        events.emit(EventBody::exited(code, None));
    });
}

fn parse_signal(name: &str) -> Option<nix::sys::signal::Signal> {
    use nix::sys::signal::Signal;
    let trimmed = name.trim_start_matches("SIG").to_ascii_uppercase();
    match trimmed.as_str() {
        "HUP" => Some(Signal::SIGHUP),
        "INT" => Some(Signal::SIGINT),
        "QUIT" => Some(Signal::SIGQUIT),
        "KILL" => Some(Signal::SIGKILL),
        "TERM" => Some(Signal::SIGTERM),
        "USR1" => Some(Signal::SIGUSR1),
        "USR2" => Some(Signal::SIGUSR2),
        "STOP" => Some(Signal::SIGSTOP),
        "CONT" => Some(Signal::SIGCONT),
        "WINCH" => Some(Signal::SIGWINCH),
        _ => None,
    }
}

fn send_signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<(), AdapterError> {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    match nix::sys::signal::kill(pid, sig) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Err(AdapterError::ClosedSink),
        Err(e) => Err(AdapterError::BadArgs(format!("signal delivery failed: {}", e))),
    }
}

#[cfg(test)]
#[path = "pty_tests.rs"]
mod tests;
