// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the transport multiplexer.
//!
//! JSON messages over a WebSocket; every message is an object with
//! `{"v": 1, "op": <string>, ...fields}`. One connection carries many
//! session attachments. Binary payloads (PTY bytes) travel base64-encoded
//! in `payload`.

use sb_core::{Channel, SessionEvent};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Protocol version stamped on every frame.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (8 MB).
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported protocol version: {0}")]
    Version(u64),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Handshake; must be the first message on a connection.
    Hello {
        client_id: String,
        #[serde(default)]
        token: Option<String>,
    },

    /// Subscribe to a session, replaying history after `from_seq`.
    Attach {
        session_id: String,
        #[serde(default)]
        from_seq: u64,
    },

    /// Drop a subscription.
    Detach { session_id: String },

    /// Raw input, base64-encoded.
    Input { session_id: String, payload: String },

    /// Kind-specific operation (`resize`, `signal`, ...).
    Op {
        session_id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },

    /// Ask the orchestrator to stop the session.
    Close { session_id: String },

    Ping,
    Pong,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Handshake response.
    Welcome { server_caps: ServerCaps },

    /// One delivered session event.
    Event {
        session_id: String,
        seq: u64,
        channel: Channel,
        #[serde(rename = "type")]
        event_type: String,
        payload: serde_json::Value,
        timestamp_ms: u64,
    },

    /// Advisory delivery acknowledgement, sent with heartbeats.
    Ack { session_id: String, seq: u64 },

    /// Operation or connection error.
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    Ping,
    Pong,
}

/// Capabilities advertised in `welcome`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerCaps {
    pub protocol_version: u32,
    pub server_version: String,
    /// Registered session kinds.
    pub kinds: Vec<String>,
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        ServerMessage::Event {
            session_id: event.session_id.0,
            seq: event.seq,
            channel: event.body.channel,
            event_type: event.body.event_type,
            payload: event.body.payload,
            timestamp_ms: event.timestamp_ms,
        }
    }
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>, session_id: Option<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
            session_id,
        }
    }
}

/// Encode a message, stamping the version field.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let mut value = serde_json::to_value(msg)?;
    value
        .as_object_mut()
        .ok_or_else(|| ProtocolError::Malformed("message must be an object".to_string()))?
        .insert("v".to_string(), PROTOCOL_VERSION.into());

    let text = serde_json::to_string(&value)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(text)
}

/// Decode a message, checking size and version.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    let v = value
        .get("v")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ProtocolError::Malformed("missing version field".to_string()))?;
    if v != u64::from(PROTOCOL_VERSION) {
        return Err(ProtocolError::Version(v));
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
