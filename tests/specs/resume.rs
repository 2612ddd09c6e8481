// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resume rebuilds conversation context from the persisted transcript.

use crate::prelude::*;
use sb_adapters::AdapterCall;
use sb_core::{status_type, Channel, EventBody, SessionKind, SessionStatus};
use tempfile::tempdir;

fn message(role: &str, text: &str) -> EventBody {
    EventBody::new(
        Channel::AssistantMessage,
        role,
        serde_json::json!({ "text": text }),
    )
}

#[tokio::test]
async fn close_then_resume_continues_the_sequence() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["assistant"]);

    let id = k
        .orchestrator
        .create(
            SessionKind::assistant(),
            None,
            serde_json::json!({ "model": "large" }),
        )
        .await
        .unwrap();

    // Three exchanged turns: six persisted messages
    for turn in 1..=3 {
        k.adapter
            .emit(&id, message("user", &format!("question {}", turn)));
        k.adapter
            .emit(&id, message("complete", &format!("answer {}", turn)));
    }
    k.orchestrator.close(&id).await.unwrap();
    wait_for_status(&k.orchestrator, &id, SessionStatus::Stopped).await;

    // created + 6 messages + exited
    let before = k.orchestrator.history(&id, 0, 0).unwrap();
    assert_eq!(before.len(), 8);

    let outcome = k.orchestrator.resume(&id).await.unwrap();
    assert!(outcome.resumed);
    assert!(outcome.reason.is_none());

    // The adapter received the full transcript to rebuild context from
    let (last_seq, transcript_len) = k
        .adapter
        .recorded_calls()
        .into_iter()
        .find_map(|c| match c {
            AdapterCall::Resume {
                last_seq,
                transcript_len,
                ..
            } => Some((last_seq, transcript_len)),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_seq, 8);
    assert_eq!(transcript_len, 8);

    // A fresh status:created continues the session's sequence
    let after = k.orchestrator.history(&id, 8, 0).unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].seq, 9);
    assert_eq!(after[0].body.event_type, status_type::CREATED);
    assert_eq!(after[0].body.payload["resumed"], true);
    assert_eq!(
        k.orchestrator.find(&id).unwrap().status,
        SessionStatus::Running
    );
}

#[tokio::test]
async fn resume_of_running_session_is_a_noop() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["assistant"]);

    let id = k
        .orchestrator
        .create(SessionKind::assistant(), None, serde_json::Value::Null)
        .await
        .unwrap();

    let outcome = k.orchestrator.resume(&id).await.unwrap();
    assert!(!outcome.resumed);
    assert_eq!(outcome.reason.as_deref(), Some("already-running"));

    // No extra status:created was recorded
    assert_eq!(k.orchestrator.history(&id, 0, 0).unwrap().len(), 1);
}
