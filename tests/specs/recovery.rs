// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery: persisted-running sessions settle deterministically.

use crate::prelude::*;
use sb_core::{status_type, SessionKind, SessionStatus};
use tempfile::tempdir;

#[tokio::test]
async fn crashed_session_recovers_as_stopped_when_resume_unsupported() {
    let dir = tempdir().unwrap();
    let id;

    // First daemon run: 42 events persisted, then a crash. The old kernel
    // is leaked — a real crash runs no destructors — so the record stays
    // persisted as running with no live handle.
    {
        let k = kernel(dir.path(), 64, &["pty"]);
        id = k
            .orchestrator
            .create(SessionKind::pty(), None, serde_json::Value::Null)
            .await
            .unwrap();
        k.adapter.emit_chunks(&id, 1, 41); // created + 41 chunks = 42 events
        for _ in 0..100 {
            if k.orchestrator.history(&id, 0, 0).unwrap().len() == 42 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(k.orchestrator.find(&id).unwrap().status, SessionStatus::Running);
        std::mem::forget(k);
    }

    // Restart: the PTY-like adapter cannot re-attach
    let k = kernel(dir.path(), 64, &["pty"]);
    k.adapter.set_resume_unsupported(true);
    let report = sb_kernel::reconcile(&k.orchestrator).await;

    assert_eq!(report.stopped, vec![id.clone()]);
    assert_eq!(
        k.orchestrator.find(&id).unwrap().status,
        SessionStatus::Stopped
    );

    let events = k.orchestrator.history(&id, 0, 0).unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.seq, 43);
    assert_eq!(last.body.channel, sb_core::Channel::Status);
    assert_eq!(last.body.event_type, status_type::RECOVERED_AS_STOPPED);
}

#[tokio::test]
async fn resumable_session_stays_running_after_restart() {
    let dir = tempdir().unwrap();
    let id;
    {
        let k = kernel(dir.path(), 64, &["assistant"]);
        id = k
            .orchestrator
            .create(SessionKind::assistant(), None, serde_json::Value::Null)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::mem::forget(k);
    }

    let k = kernel(dir.path(), 64, &["assistant"]);
    let report = sb_kernel::reconcile(&k.orchestrator).await;

    assert_eq!(report.resumed, vec![id.clone()]);
    assert!(k.orchestrator.is_live(&id));
    assert_eq!(
        k.orchestrator.find(&id).unwrap().status,
        SessionStatus::Running
    );

    // A client reattaching sees the whole coherent stream
    let mut sub = k.orchestrator.attach(&id, 0).await.unwrap();
    let first = sub.next().await.unwrap().unwrap();
    assert_eq!(first.seq, 1);
    assert_eq!(first.body.event_type, status_type::CREATED);
}
