// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted adapter for kernel and daemon tests.

use crate::adapter::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::{Channel, CloseReason, EventBody, SessionId};
use std::collections::HashMap;
use std::sync::Arc;

/// A recorded adapter invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    Create {
        session_id: SessionId,
    },
    Resume {
        session_id: SessionId,
        last_seq: u64,
        transcript_len: usize,
    },
    SendInput {
        session_id: SessionId,
        bytes: Vec<u8>,
    },
    Perform {
        session_id: SessionId,
        op: String,
        args: serde_json::Value,
    },
    Close {
        session_id: SessionId,
        reason: CloseReason,
    },
}

struct FakeProc {
    token: String,
    events: EventSink,
}

/// Test adapter: records calls, lets tests drive the event stream.
///
/// By default `create` succeeds, input is echoed as a `stdin-echo` event,
/// and `close` emits `status:exited{code: 0}`. Failure modes are toggled
/// per instance.
#[derive(Clone)]
pub struct FakeAdapter {
    kind: &'static str,
    calls: Arc<Mutex<Vec<AdapterCall>>>,
    procs: Arc<Mutex<HashMap<SessionId, FakeProc>>>,
    fail_create: Arc<Mutex<Option<String>>>,
    resume_unsupported: Arc<Mutex<bool>>,
    echo_input: Arc<Mutex<bool>>,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::with_kind("fake")
    }

    /// A fake registered under a specific kind string.
    pub fn with_kind(kind: &'static str) -> Self {
        Self {
            kind,
            calls: Arc::new(Mutex::new(Vec::new())),
            procs: Arc::new(Mutex::new(HashMap::new())),
            fail_create: Arc::new(Mutex::new(None)),
            resume_unsupported: Arc::new(Mutex::new(false)),
            echo_input: Arc::new(Mutex::new(true)),
        }
    }

    pub fn recorded_calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().clone()
    }

    /// Make subsequent `create` calls fail with `SpawnFailed(reason)`.
    pub fn fail_create(&self, reason: &str) {
        *self.fail_create.lock() = Some(reason.to_string());
    }

    /// Make subsequent `resume` calls fail with `ResumeUnsupported`.
    pub fn set_resume_unsupported(&self, unsupported: bool) {
        *self.resume_unsupported.lock() = unsupported;
    }

    /// Disable the default stdin-echo behavior.
    pub fn set_echo_input(&self, echo: bool) {
        *self.echo_input.lock() = echo;
    }

    /// True while the fake holds a live proc for the session.
    pub fn is_live(&self, session_id: &SessionId) -> bool {
        self.procs.lock().contains_key(session_id)
    }

    /// Emit an arbitrary event from "the process".
    pub fn emit(&self, session_id: &SessionId, body: EventBody) {
        if let Some(proc) = self.procs.lock().get(session_id) {
            proc.events.emit(body);
        }
    }

    /// Emit `n` stdout chunks, numbered from `start`.
    pub fn emit_chunks(&self, session_id: &SessionId, start: usize, n: usize) {
        for i in start..start + n {
            self.emit(
                session_id,
                EventBody::output_chunk(Channel::Stdout, format!("chunk {}\n", i).as_bytes()),
            );
        }
    }

    /// Simulate the process exiting on its own.
    pub fn exit(&self, session_id: &SessionId, code: i32) {
        let proc = self.procs.lock().remove(session_id);
        if let Some(proc) = proc {
            proc.events.emit(EventBody::exited(Some(code), None));
        }
    }

    fn register(&self, session_id: SessionId, events: EventSink) -> ProcessHandle {
        let handle = ProcessHandle::new(session_id.clone());
        self.procs.lock().insert(
            session_id,
            FakeProc {
                token: handle.token().to_string(),
                events,
            },
        );
        handle
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn create(
        &self,
        spec: SpawnSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        self.calls.lock().push(AdapterCall::Create {
            session_id: spec.session_id.clone(),
        });
        if let Some(reason) = self.fail_create.lock().clone() {
            return Err(AdapterError::SpawnFailed(reason));
        }
        Ok(self.register(spec.session_id, events))
    }

    async fn resume(
        &self,
        spec: ResumeSpec,
        events: EventSink,
    ) -> Result<ProcessHandle, AdapterError> {
        self.calls.lock().push(AdapterCall::Resume {
            session_id: spec.session_id.clone(),
            last_seq: spec.last_seq,
            transcript_len: spec.transcript.len(),
        });
        if *self.resume_unsupported.lock() {
            return Err(AdapterError::ResumeUnsupported(self.kind.to_string()));
        }
        Ok(self.register(spec.session_id, events))
    }

    async fn send_input(&self, handle: &ProcessHandle, bytes: &[u8]) -> Result<(), AdapterError> {
        self.calls.lock().push(AdapterCall::SendInput {
            session_id: handle.session_id.clone(),
            bytes: bytes.to_vec(),
        });
        let procs = self.procs.lock();
        let proc = procs
            .get(&handle.session_id)
            .filter(|p| p.token == handle.token())
            .ok_or(AdapterError::ClosedSink)?;
        if *self.echo_input.lock() {
            proc.events
                .emit(EventBody::output_chunk(Channel::StdinEcho, bytes));
        }
        Ok(())
    }

    async fn perform(
        &self,
        handle: &ProcessHandle,
        op: &str,
        args: serde_json::Value,
    ) -> Result<(), AdapterError> {
        self.calls.lock().push(AdapterCall::Perform {
            session_id: handle.session_id.clone(),
            op: op.to_string(),
            args,
        });
        if !self.procs.lock().contains_key(&handle.session_id) {
            return Err(AdapterError::ClosedSink);
        }
        Ok(())
    }

    async fn close(&self, handle: &ProcessHandle, reason: CloseReason) -> Result<(), AdapterError> {
        self.calls.lock().push(AdapterCall::Close {
            session_id: handle.session_id.clone(),
            reason,
        });
        let proc = {
            let mut procs = self.procs.lock();
            match procs.get(&handle.session_id) {
                Some(p) if p.token == handle.token() => procs.remove(&handle.session_id),
                _ => None,
            }
        };
        if let Some(proc) = proc {
            proc.events.emit(EventBody::exited(Some(0), None));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
