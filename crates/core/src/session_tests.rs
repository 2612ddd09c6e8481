// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    running = { SessionStatus::Running, false, false },
    idle = { SessionStatus::Idle, true, true },
    stopped = { SessionStatus::Stopped, true, true },
)]
fn test_status_transitions(status: SessionStatus, can_resume: bool, can_delete: bool) {
    assert_eq!(status.can_resume(), can_resume);
    assert_eq!(status.can_delete(), can_delete);
    assert_eq!(status.is_live(), status == SessionStatus::Running);
}

#[test]
fn test_status_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&SessionStatus::Running).unwrap(),
        "\"running\""
    );
    assert_eq!(SessionStatus::Stopped.to_string(), "stopped");
}

#[test]
fn test_record_starts_running() {
    let record = SessionRecord::new(
        SessionId::new("s1"),
        SessionKind::pty(),
        "/tmp".into(),
        serde_json::json!({ "shell": "/bin/sh" }),
        100,
    );
    assert_eq!(record.status, SessionStatus::Running);
    assert_eq!(record.created_at_ms, 100);
    assert_eq!(record.updated_at_ms, 100);
}

#[test]
fn test_record_serde_round_trip_with_null_metadata() {
    let record = SessionRecord::new(
        SessionId::new("s2"),
        SessionKind::file_editor(),
        "/work".into(),
        serde_json::Value::Null,
        1,
    );
    let json = serde_json::to_string(&record).unwrap();
    let back: SessionRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_close_reason_labels() {
    assert_eq!(CloseReason::Requested.as_str(), "requested");
    assert_eq!(
        serde_json::to_string(&CloseReason::Suspend).unwrap(),
        "\"suspend\""
    );
}
