// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and helpers for other crates' tests.

use crate::event::{Channel, EventBody};
use crate::id::SessionId;
use crate::session::{SessionKind, SessionRecord};

/// A running PTY session record rooted at `/tmp`.
pub fn session_record(id: &str) -> SessionRecord {
    SessionRecord::new(
        SessionId::new(id),
        SessionKind::pty(),
        "/tmp".into(),
        serde_json::Value::Null,
        1_000,
    )
}

/// A stdout chunk carrying the given text.
pub fn stdout_chunk(text: &str) -> EventBody {
    EventBody::output_chunk(Channel::Stdout, text.as_bytes())
}
