// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: create, close, delete, suspend.

use crate::prelude::*;
use sb_core::{status_type, SessionKind, SessionStatus};
use sb_kernel::KernelError;
use tempfile::tempdir;

#[tokio::test]
async fn create_close_delete_leaves_no_state() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["pty"]);

    let id = k
        .orchestrator
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    assert!(dir.path().join("sessions").join(id.as_str()).is_dir());

    k.orchestrator.close(&id).await.unwrap();
    wait_for_status(&k.orchestrator, &id, SessionStatus::Stopped).await;

    k.orchestrator.delete(&id).unwrap();
    assert!(k.orchestrator.find(&id).is_none());
    assert!(!dir.path().join("sessions").join(id.as_str()).exists());
    assert!(matches!(
        k.orchestrator.history(&id, 0, 0),
        Err(KernelError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn events_are_dense_from_one() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["pty"]);

    let id = k
        .orchestrator
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    k.adapter.emit_chunks(&id, 1, 25);
    k.orchestrator.close(&id).await.unwrap();
    wait_for_status(&k.orchestrator, &id, SessionStatus::Stopped).await;

    let events = k.orchestrator.history(&id, 0, 0).unwrap();
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let expected: Vec<u64> = (1..=events.len() as u64).collect();
    assert_eq!(seqs, expected);
    assert_eq!(events[0].body.event_type, status_type::CREATED);
    assert_eq!(
        events.last().unwrap().body.event_type,
        status_type::EXITED
    );
}

#[tokio::test]
async fn suspend_parks_idle_and_resume_restores() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["pty"]);

    let id = k
        .orchestrator
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    k.orchestrator.suspend(&id).await.unwrap();
    wait_for_status(&k.orchestrator, &id, SessionStatus::Idle).await;

    let outcome = k.orchestrator.resume(&id).await.unwrap();
    assert!(outcome.resumed);
    assert!(k.orchestrator.is_live(&id));
}

#[tokio::test]
async fn input_to_stopped_session_is_rejected() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), 64, &["pty"]);

    let id = k
        .orchestrator
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    k.adapter.exit(&id, 0);
    wait_for_status(&k.orchestrator, &id, SessionStatus::Stopped).await;

    let err = k.orchestrator.send_input(&id, b"echo hi\n").await.unwrap_err();
    assert!(matches!(err, KernelError::SessionNotLive(_)));
}
