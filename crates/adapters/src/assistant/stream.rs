// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parser for the assistant's line-delimited JSON output stream.
//!
//! The assistant process writes one JSON object per stdout line. Partial
//! streaming tokens (`delta`) are buffered so the `complete` event carries
//! the whole turn; everything else maps one line to one event. Unparseable
//! or unknown lines are skipped.

use sb_core::{Channel, EventBody};
use serde::Deserialize;
use tracing::trace;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    MessageStart,
    Delta {
        text: String,
    },
    MessageStop,
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolResult {
        id: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    Error {
        message: String,
    },
}

/// Stateful stream parser; one per assistant process.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one stdout line into zero or more events.
    pub fn feed_line(&mut self, line: &str) -> Vec<EventBody> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let parsed: StreamLine = match serde_json::from_str(trimmed) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, line = trimmed, "skipping unparseable assistant line");
                return Vec::new();
            }
        };

        match parsed {
            StreamLine::MessageStart => {
                self.buffer.clear();
                vec![EventBody::new(
                    Channel::AssistantMessage,
                    "start",
                    serde_json::Value::Null,
                )]
            }
            StreamLine::Delta { text } => {
                self.buffer.push_str(&text);
                vec![EventBody::new(
                    Channel::AssistantMessage,
                    "delta",
                    serde_json::json!({ "text": text }),
                )]
            }
            StreamLine::MessageStop => {
                let text = std::mem::take(&mut self.buffer);
                vec![EventBody::new(
                    Channel::AssistantMessage,
                    "complete",
                    serde_json::json!({ "text": text }),
                )]
            }
            StreamLine::ToolCall { id, name, args } => vec![EventBody::new(
                Channel::ToolCall,
                "call",
                serde_json::json!({ "id": id, "name": name, "args": args }),
            )],
            StreamLine::ToolResult { id, output } => vec![EventBody::new(
                Channel::ToolResult,
                "result",
                serde_json::json!({ "id": id, "output": output }),
            )],
            StreamLine::Error { message } => vec![EventBody::new(
                Channel::Error,
                "assistant",
                serde_json::json!({ "message": message }),
            )],
        }
    }

    /// Buffered partial text for a turn cut off mid-stream, if any.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
