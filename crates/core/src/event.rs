// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event model for the run-session kernel.
//!
//! Adapters produce [`EventBody`] values; the recorder assigns a sequence
//! number and timestamp, turning them into [`SessionEvent`]s that are
//! persisted and fanned out to subscribers. Per session, `seq` is dense
//! from 1 and never reused.

use crate::id::SessionId;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Channels partition events by direction and semantics.
///
/// This set is closed: every event an adapter emits lands on exactly one
/// of these channels, with a channel-specific `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Stdout,
    Stderr,
    StdinEcho,
    Resize,
    Status,
    AssistantMessage,
    ToolCall,
    ToolResult,
    Error,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stdout => "stdout",
            Channel::Stderr => "stderr",
            Channel::StdinEcho => "stdin-echo",
            Channel::Resize => "resize",
            Channel::Status => "status",
            Channel::AssistantMessage => "assistant-message",
            Channel::ToolCall => "tool-call",
            Channel::ToolResult => "tool-result",
            Channel::Error => "error",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `type` values used on the `status` channel.
pub mod status_type {
    pub const CREATED: &str = "created";
    pub const EXITED: &str = "exited";
    pub const ERROR: &str = "error";
    pub const RECOVERED_AS_STOPPED: &str = "recovered-as-stopped";
    pub const STORAGE_ERROR: &str = "storage-error";
}

/// An event as produced by an adapter, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    pub channel: Channel,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl EventBody {
    pub fn new(
        channel: Channel,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel,
            event_type: event_type.into(),
            payload,
        }
    }

    /// Raw output bytes, base64-encoded under `payload.data`.
    pub fn output_chunk(channel: Channel, bytes: &[u8]) -> Self {
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::new(channel, "chunk", serde_json::json!({ "data": data }))
    }

    /// Status event with an arbitrary payload.
    pub fn status(event_type: &str, payload: serde_json::Value) -> Self {
        Self::new(Channel::Status, event_type, payload)
    }

    /// Terminal process-exit status event.
    pub fn exited(code: Option<i32>, signal: Option<String>) -> Self {
        Self::status(
            status_type::EXITED,
            serde_json::json!({ "code": code, "signal": signal }),
        )
    }

    /// Terminal error status event (`kind` is an error-kind label).
    pub fn status_error(kind: &str, message: &str) -> Self {
        Self::status(
            status_type::ERROR,
            serde_json::json!({ "kind": kind, "message": message }),
        )
    }

    /// Decode the base64 `payload.data` field of an output chunk.
    pub fn decode_chunk(&self) -> Option<Vec<u8>> {
        let data = self.payload.get("data")?.as_str()?;
        base64::engine::general_purpose::STANDARD.decode(data).ok()
    }

    /// True for the terminal status types that end a session.
    pub fn is_terminal_status(&self) -> bool {
        self.channel == Channel::Status
            && matches!(
                self.event_type.as_str(),
                status_type::EXITED | status_type::ERROR | status_type::RECOVERED_AS_STOPPED
            )
    }
}

/// A sequenced, timestamped event as persisted and delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub seq: u64,
    #[serde(flatten)]
    pub body: EventBody,
    pub timestamp_ms: u64,
}

impl SessionEvent {
    pub fn new(session_id: SessionId, seq: u64, body: EventBody, timestamp_ms: u64) -> Self {
        Self {
            session_id,
            seq,
            body,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
