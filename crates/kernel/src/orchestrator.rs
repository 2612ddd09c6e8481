// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestrator: lifecycle state machine and live-session table.
//!
//! The orchestrator references adapters and process handles but never owns
//! process state; each adapter owns its processes, and persisted records
//! never reference runtime structures. Every live session has one pump
//! task forwarding its adapter's events into the recorder; the
//! `running -> stopped` (or `idle`) transition happens when the terminal
//! status event flows through that pump, not synchronously in `close`.

use crate::error::KernelError;
use crate::recorder::{Recorder, Subscription};
use crate::registry::AdapterRegistry;
use parking_lot::RwLock;
use sb_adapters::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
use sb_core::{
    status_type, Clock, CloseReason, EventBody, SessionEvent, SessionId, SessionKind,
    SessionRecord, SessionStatus,
};
use sb_storage::{EventStore, WorkspaceIndex};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Orchestrator tunables, read once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default cwd when a create request does not name one.
    pub workspaces_root: PathBuf,
    /// Bound on adapter create/resume.
    pub spawn_timeout: Duration,
    /// How long to wait for a terminal status event after `close`.
    pub close_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspaces_root: PathBuf::from("."),
            spawn_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Result of a resume request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeOutcome {
    pub resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

struct LiveSession {
    adapter: Arc<dyn Adapter>,
    handle: ProcessHandle,
    /// Set by `suspend`: the pump parks the record at `idle` instead of
    /// `stopped` when the terminal event arrives.
    park_idle: Arc<AtomicBool>,
}

/// Creates, resumes, suspends, closes, and deletes sessions.
pub struct Orchestrator {
    store: Arc<EventStore>,
    registry: Arc<AdapterRegistry>,
    recorder: Arc<Recorder>,
    workspaces: Arc<WorkspaceIndex>,
    clock: Arc<dyn Clock>,
    live: Arc<RwLock<HashMap<SessionId, LiveSession>>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<EventStore>,
        registry: Arc<AdapterRegistry>,
        recorder: Arc<Recorder>,
        workspaces: Arc<WorkspaceIndex>,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            recorder,
            workspaces,
            clock,
            live: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn is_live(&self, id: &SessionId) -> bool {
        self.live.read().contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    /// Create a session: spawn via the kind's adapter, persist the record,
    /// record `status:created`, and start pumping events.
    pub async fn create(
        &self,
        kind: SessionKind,
        cwd: Option<PathBuf>,
        metadata: serde_json::Value,
    ) -> Result<SessionId, KernelError> {
        let adapter = self
            .registry
            .get(kind.as_str())
            .ok_or_else(|| KernelError::UnknownKind(kind.to_string()))?;
        let cwd = cwd.unwrap_or_else(|| self.config.workspaces_root.clone());
        let id = SessionId::generate();

        let (sink, rx) = EventSink::channel();
        let spec = SpawnSpec {
            session_id: id.clone(),
            cwd: cwd.clone(),
            metadata: metadata.clone(),
        };
        let handle = self
            .spawn_bounded(adapter.create(spec, sink))
            .await?;

        let now = self.clock.epoch_ms();
        let record = SessionRecord::new(id.clone(), kind.clone(), cwd.clone(), metadata, now);
        if let Err(e) = self.store.create_session(record) {
            warn!(session_id = %id, error = %e, "session row persist failed, closing fresh handle");
            let _ = adapter.close(&handle, CloseReason::Failed).await;
            return Err(KernelError::CreateFailed(e.to_string()));
        }

        if let Err(e) = self
            .recorder
            .record(&id, created_event(&kind, &cwd, false))
            .await
        {
            let _ = adapter.close(&handle, CloseReason::Failed).await;
            return Err(KernelError::CreateFailed(e.to_string()));
        }

        self.bind(id.clone(), adapter, handle, rx);
        if let Err(e) = self.workspaces.touch(&cwd, now) {
            warn!(cwd = %cwd.display(), error = %e, "workspace touch failed");
        }

        info!(session_id = %id, kind = %kind, cwd = %cwd.display(), "session created");
        Ok(id)
    }

    /// Resume a stopped or idle session (also used by boot recovery for
    /// sessions persisted `running` whose handles died with the daemon).
    ///
    /// No-op with `reason: "already-running"` when a live handle exists.
    /// `ResumeUnsupported` propagates and leaves the status unchanged.
    pub async fn resume(&self, id: &SessionId) -> Result<ResumeOutcome, KernelError> {
        let record = self
            .store
            .find_by_id(id)
            .ok_or_else(|| KernelError::SessionNotFound(id.to_string()))?;

        if self.is_live(id) {
            return Ok(ResumeOutcome {
                resumed: false,
                reason: Some("already-running".to_string()),
            });
        }

        let adapter = self
            .registry
            .get(record.kind.as_str())
            .ok_or_else(|| KernelError::UnknownKind(record.kind.to_string()))?;

        let last_seq = self.store.latest_seq(id)?;
        let transcript = self.store.events_since(id, 0, 0)?;

        let (sink, rx) = EventSink::channel();
        let spec = ResumeSpec {
            session_id: id.clone(),
            cwd: record.cwd.clone(),
            metadata: record.metadata.clone(),
            last_seq,
            transcript,
        };
        let handle = self.spawn_bounded(adapter.resume(spec, sink)).await?;

        let now = self.clock.epoch_ms();
        self.store
            .update_status(id, SessionStatus::Running, now)?;
        if let Err(e) = self
            .recorder
            .record(id, created_event(&record.kind, &record.cwd, true))
            .await
        {
            let _ = adapter.close(&handle, CloseReason::Failed).await;
            return Err(KernelError::CreateFailed(e.to_string()));
        }

        self.bind(id.clone(), adapter, handle, rx);
        if let Err(e) = self.workspaces.touch(&record.cwd, now) {
            warn!(cwd = %record.cwd.display(), error = %e, "workspace touch failed");
        }

        info!(session_id = %id, kind = %record.kind, "session resumed");
        Ok(ResumeOutcome {
            resumed: true,
            reason: None,
        })
    }

    /// Deliver raw input. Requires a live session.
    pub async fn send_input(&self, id: &SessionId, bytes: &[u8]) -> Result<(), KernelError> {
        let (adapter, handle) = self.live_entry(id)?;
        adapter.send_input(&handle, bytes).await.map_err(Into::into)
    }

    /// Perform a kind-specific operation. Requires a live session.
    pub async fn perform(
        &self,
        id: &SessionId,
        op: &str,
        args: serde_json::Value,
    ) -> Result<(), KernelError> {
        let (adapter, handle) = self.live_entry(id)?;
        adapter.perform(&handle, op, args).await.map_err(Into::into)
    }

    /// Ask the adapter to stop the session. Idempotent; the status
    /// transition happens when the terminal event arrives.
    pub async fn close(&self, id: &SessionId) -> Result<(), KernelError> {
        let entry = {
            let live = self.live.read();
            live.get(id)
                .map(|l| (Arc::clone(&l.adapter), l.handle.clone()))
        };
        let Some((adapter, handle)) = entry else {
            // Already stopped (or mid-teardown): close is a no-op
            return if self.store.find_by_id(id).is_some() {
                Ok(())
            } else {
                Err(KernelError::SessionNotFound(id.to_string()))
            };
        };

        adapter.close(&handle, CloseReason::Requested).await?;
        self.spawn_close_backstop(id.clone());
        Ok(())
    }

    /// Stop the process but park the record at `idle` for later resume.
    pub async fn suspend(&self, id: &SessionId) -> Result<(), KernelError> {
        let (adapter, handle) = {
            let live = self.live.read();
            let entry = live.get(id).ok_or_else(|| {
                if self.store.find_by_id(id).is_some() {
                    KernelError::SessionNotLive(id.to_string())
                } else {
                    KernelError::SessionNotFound(id.to_string())
                }
            })?;
            entry.park_idle.store(true, Ordering::SeqCst);
            (Arc::clone(&entry.adapter), entry.handle.clone())
        };

        adapter.close(&handle, CloseReason::Suspend).await?;
        self.spawn_close_backstop(id.clone());
        Ok(())
    }

    /// Purge a stopped or idle session: events and record.
    pub fn delete(&self, id: &SessionId) -> Result<(), KernelError> {
        let record = self
            .store
            .find_by_id(id)
            .ok_or_else(|| KernelError::SessionNotFound(id.to_string()))?;
        if self.is_live(id) || !record.status.can_delete() {
            return Err(KernelError::SessionRunning(id.to_string()));
        }

        self.store.delete(id)?;
        self.recorder.drop_session(id);
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Attach a subscriber, replaying history from `from_seq`.
    pub async fn attach(
        &self,
        id: &SessionId,
        from_seq: u64,
    ) -> Result<Subscription, KernelError> {
        if self.store.find_by_id(id).is_none() {
            return Err(KernelError::SessionNotFound(id.to_string()));
        }
        self.recorder.subscribe(id, from_seq).await.map_err(Into::into)
    }

    pub fn find(&self, id: &SessionId) -> Option<SessionRecord> {
        self.store.find_by_id(id)
    }

    pub fn list(&self, cwd: Option<&Path>) -> Vec<SessionRecord> {
        match cwd {
            Some(cwd) => self.store.list_by_cwd(cwd),
            None => self.store.list_sessions(),
        }
    }

    /// Persisted events with `seq > from_seq` (the HTTP history surface).
    pub fn history(
        &self,
        id: &SessionId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, KernelError> {
        if self.store.find_by_id(id).is_none() {
            return Err(KernelError::SessionNotFound(id.to_string()));
        }
        self.store
            .events_since(id, from_seq, limit)
            .map_err(Into::into)
    }

    /// Close every live session and wait (bounded) for the pumps to drain.
    pub async fn shutdown_all(&self) {
        let entries: Vec<_> = {
            let live = self.live.read();
            live.iter()
                .map(|(id, l)| (id.clone(), Arc::clone(&l.adapter), l.handle.clone()))
                .collect()
        };
        for (id, adapter, handle) in entries {
            if let Err(e) = adapter.close(&handle, CloseReason::Shutdown).await {
                warn!(session_id = %id, error = %e, "close during shutdown failed");
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.close_grace;
        while !self.live.read().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining: Vec<SessionId> = self.live.write().drain().map(|(id, _)| id).collect();
        for id in remaining {
            warn!(session_id = %id, "session did not drain during shutdown, marking stopped");
            if let Err(e) = self
                .store
                .update_status(&id, SessionStatus::Stopped, self.clock.epoch_ms())
            {
                warn!(session_id = %id, error = %e, "failed to persist stopped status");
            }
        }
    }

    fn live_entry(
        &self,
        id: &SessionId,
    ) -> Result<(Arc<dyn Adapter>, ProcessHandle), KernelError> {
        let live = self.live.read();
        match live.get(id) {
            Some(entry) => Ok((Arc::clone(&entry.adapter), entry.handle.clone())),
            None => {
                if self.store.find_by_id(id).is_some() {
                    Err(KernelError::SessionNotLive(id.to_string()))
                } else {
                    Err(KernelError::SessionNotFound(id.to_string()))
                }
            }
        }
    }

    async fn spawn_bounded(
        &self,
        fut: impl Future<Output = Result<ProcessHandle, AdapterError>>,
    ) -> Result<ProcessHandle, KernelError> {
        match tokio::time::timeout(self.config.spawn_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(KernelError::Adapter(AdapterError::SpawnTimeout(
                self.config.spawn_timeout.as_millis() as u64,
            ))),
        }
    }

    /// Register the live entry and start the session's pump task.
    fn bind(
        &self,
        id: SessionId,
        adapter: Arc<dyn Adapter>,
        handle: ProcessHandle,
        mut rx: mpsc::UnboundedReceiver<EventBody>,
    ) {
        let park_idle = Arc::new(AtomicBool::new(false));
        self.live.write().insert(
            id.clone(),
            LiveSession {
                adapter: Arc::clone(&adapter),
                handle: handle.clone(),
                park_idle: Arc::clone(&park_idle),
            },
        );

        let recorder = Arc::clone(&self.recorder);
        let store = Arc::clone(&self.store);
        let live = Arc::clone(&self.live);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            let mut final_status = None;
            while let Some(body) = rx.recv().await {
                let terminal = body.is_terminal_status();
                if let Err(e) = recorder.record(&id, body).await {
                    // Storage failure is fatal for the session; prior
                    // persisted events remain valid.
                    error!(session_id = %id, error = %e, "append failed, closing session");
                    let _ = adapter.close(&handle, CloseReason::Failed).await;
                    final_status = Some(SessionStatus::Stopped);
                    break;
                }
                if terminal {
                    final_status = Some(if park_idle.load(Ordering::SeqCst) {
                        SessionStatus::Idle
                    } else {
                        SessionStatus::Stopped
                    });
                    break;
                }
            }

            // Channel closed without a terminal event means the adapter
            // died silently; park as stopped either way.
            let status = final_status.unwrap_or(SessionStatus::Stopped);
            live.write().remove(&id);
            if let Err(e) = store.update_status(&id, status, clock.epoch_ms()) {
                warn!(session_id = %id, error = %e, "failed to persist final status");
            }
            debug!(session_id = %id, status = %status, "session finalized");
        });
    }

    /// Force-cleanup a session whose adapter never emitted its terminal
    /// event after a close request.
    fn spawn_close_backstop(&self, id: SessionId) {
        let live = Arc::clone(&self.live);
        let store = Arc::clone(&self.store);
        let recorder = Arc::clone(&self.recorder);
        let clock = Arc::clone(&self.clock);
        let grace = self.config.close_grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let stuck = live.write().remove(&id).is_some();
            if !stuck {
                return;
            }
            warn!(session_id = %id, "no terminal status after close, force-cleaning");
            let _ = recorder
                .record(
                    &id,
                    EventBody::status_error("close-timeout", "adapter did not emit terminal status"),
                )
                .await;
            if let Err(e) = store.update_status(&id, SessionStatus::Stopped, clock.epoch_ms()) {
                warn!(session_id = %id, error = %e, "failed to persist stopped status");
            }
        });
    }
}

fn created_event(kind: &SessionKind, cwd: &Path, resumed: bool) -> EventBody {
    EventBody::status(
        status_type::CREATED,
        serde_json::json!({
            "kind": kind.as_str(),
            "cwd": cwd,
            "resumed": resumed,
        }),
    )
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
