// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::registry::AdapterRegistry;
use sb_adapters::{AdapterCall, FakeAdapter};
use sb_core::{Channel, FakeClock};
use sb_storage::WorkspaceIndex;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct Rig {
    _dir: TempDir,
    adapter: FakeAdapter,
    orch: Orchestrator,
    clock: FakeClock,
}

fn rig() -> Rig {
    let dir = tempdir().unwrap();
    let adapter = FakeAdapter::with_kind("pty");
    let clock = FakeClock::new(1_000);
    let store = Arc::new(sb_storage::EventStore::open(dir.path()).unwrap());
    let registry = Arc::new(
        AdapterRegistry::builder()
            .register(Arc::new(adapter.clone()))
            .build(),
    );
    let recorder = Arc::new(Recorder::new(
        Arc::clone(&store),
        Arc::new(clock.clone()),
        64,
    ));
    let workspaces =
        Arc::new(WorkspaceIndex::load(&dir.path().join("workspaces.json")).unwrap());
    let orch = Orchestrator::new(
        store,
        registry,
        recorder,
        workspaces,
        Arc::new(clock.clone()),
        OrchestratorConfig {
            workspaces_root: dir.path().to_owned(),
            spawn_timeout: Duration::from_secs(2),
            close_grace: Duration::from_millis(200),
        },
    );
    Rig {
        _dir: dir,
        adapter,
        orch,
        clock,
    }
}

/// Poll until the pump finalizes the session (or time out).
async fn wait_until_not_live(orch: &Orchestrator, id: &SessionId) {
    for _ in 0..200 {
        if !orch.is_live(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never finalized", id);
}

async fn wait_for_status(orch: &Orchestrator, id: &SessionId, status: SessionStatus) {
    for _ in 0..200 {
        if orch.find(id).map(|r| r.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached {}", id, status);
}

#[tokio::test]
async fn test_create_records_status_created_with_seq_one() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    let record = rig.orch.find(&id).unwrap();
    assert_eq!(record.status, SessionStatus::Running);
    assert!(rig.orch.is_live(&id));

    let events = rig.orch.history(&id, 0, 0).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].body.event_type, status_type::CREATED);
}

#[tokio::test]
async fn test_unknown_kind_is_rejected() {
    let rig = rig();
    let err = rig
        .orch
        .create(SessionKind::new("telnet"), None, serde_json::Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::UnknownKind(_)));
}

#[tokio::test]
async fn test_spawn_failure_surfaces_and_persists_nothing() {
    let rig = rig();
    rig.adapter.fail_create("boom");

    let err = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KernelError::Adapter(AdapterError::SpawnFailed(_))
    ));
    assert!(rig.orch.list(None).is_empty());
}

#[tokio::test]
async fn test_output_flows_through_recorder_in_order() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    let mut sub = rig.orch.attach(&id, 0).await.unwrap();
    rig.adapter.emit_chunks(&id, 1, 5);

    let mut seqs = Vec::new();
    for _ in 0..6 {
        seqs.push(sub.next().await.unwrap().unwrap().seq);
    }
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_close_transitions_via_terminal_event() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    rig.orch.close(&id).await.unwrap();
    wait_until_not_live(&rig.orch, &id).await;
    wait_for_status(&rig.orch, &id, SessionStatus::Stopped).await;

    // Terminal event is persisted after status:created
    let events = rig.orch.history(&id, 0, 0).unwrap();
    assert_eq!(events.last().unwrap().body.event_type, status_type::EXITED);

    // Double close is a no-op
    rig.orch.close(&id).await.unwrap();
}

#[tokio::test]
async fn test_self_exit_transitions_to_stopped() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    rig.adapter.exit(&id, 3);
    wait_for_status(&rig.orch, &id, SessionStatus::Stopped).await;

    let events = rig.orch.history(&id, 0, 0).unwrap();
    let exited = events.last().unwrap();
    assert_eq!(exited.body.event_type, status_type::EXITED);
    assert_eq!(exited.body.payload["code"], 3);
}

#[tokio::test]
async fn test_send_input_requires_live_session() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    rig.orch.send_input(&id, b"echo hi\n").await.unwrap();
    assert!(rig
        .adapter
        .recorded_calls()
        .iter()
        .any(|c| matches!(c, AdapterCall::SendInput { bytes, .. } if bytes == b"echo hi\n")));

    rig.adapter.exit(&id, 0);
    wait_until_not_live(&rig.orch, &id).await;

    let err = rig.orch.send_input(&id, b"late\n").await.unwrap_err();
    assert!(matches!(err, KernelError::SessionNotLive(_)));

    let err = rig
        .orch
        .send_input(&SessionId::new("ghost"), b"x")
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_suspend_parks_idle_then_resume() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    rig.orch.suspend(&id).await.unwrap();
    wait_for_status(&rig.orch, &id, SessionStatus::Idle).await;

    let outcome = rig.orch.resume(&id).await.unwrap();
    assert!(outcome.resumed);
    assert_eq!(
        rig.orch.find(&id).unwrap().status,
        SessionStatus::Running
    );

    // Resuming a running session is a no-op
    let outcome = rig.orch.resume(&id).await.unwrap();
    assert!(!outcome.resumed);
    assert_eq!(outcome.reason.as_deref(), Some("already-running"));
}

#[tokio::test]
async fn test_resume_unsupported_leaves_status_unchanged() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    rig.orch.close(&id).await.unwrap();
    wait_for_status(&rig.orch, &id, SessionStatus::Stopped).await;

    rig.adapter.set_resume_unsupported(true);
    let err = rig.orch.resume(&id).await.unwrap_err();
    assert!(matches!(
        err,
        KernelError::Adapter(AdapterError::ResumeUnsupported(_))
    ));
    assert_eq!(
        rig.orch.find(&id).unwrap().status,
        SessionStatus::Stopped
    );
}

#[tokio::test]
async fn test_resume_continues_seq_and_passes_transcript() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    rig.adapter.emit_chunks(&id, 1, 3);
    rig.orch.close(&id).await.unwrap();
    wait_for_status(&rig.orch, &id, SessionStatus::Stopped).await;

    let before = rig.orch.history(&id, 0, 0).unwrap().len() as u64;
    let outcome = rig.orch.resume(&id).await.unwrap();
    assert!(outcome.resumed);

    // The adapter got the whole persisted transcript
    let resume_call = rig
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
    assert_eq!(resume_call.0, before);
    assert_eq!(resume_call.1 as u64, before);

    // A fresh status:created continues the sequence
    let events = rig.orch.history(&id, before, 0).unwrap();
    assert_eq!(events[0].seq, before + 1);
    assert_eq!(events[0].body.event_type, status_type::CREATED);
    assert_eq!(events[0].body.payload["resumed"], true);
}

#[tokio::test]
async fn test_delete_requires_stopped_and_purges() {
    let rig = rig();
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    let err = rig.orch.delete(&id).unwrap_err();
    assert!(matches!(err, KernelError::SessionRunning(_)));

    rig.orch.close(&id).await.unwrap();
    wait_for_status(&rig.orch, &id, SessionStatus::Stopped).await;

    rig.orch.delete(&id).unwrap();
    assert!(rig.orch.find(&id).is_none());
    assert!(matches!(
        rig.orch.history(&id, 0, 0),
        Err(KernelError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_list_filters_by_cwd() {
    let rig = rig();
    let other = tempdir().unwrap();
    let id_default = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    let id_other = rig
        .orch
        .create(
            SessionKind::pty(),
            Some(other.path().to_owned()),
            serde_json::Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(rig.orch.list(None).len(), 2);
    let filtered = rig.orch.list(Some(other.path()));
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, id_other);
    assert_ne!(id_default, id_other);
}

#[tokio::test]
async fn test_concurrent_creates_get_distinct_sessions() {
    let rig = rig();
    let orch = Arc::new(rig.orch);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let orch = Arc::clone(&orch);
        handles.push(tokio::spawn(async move {
            orch.create(SessionKind::pty(), None, serde_json::Value::Null)
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap().unwrap();
        assert!(ids.insert(id.clone()));
        let events = orch.history(&id, 0, 0).unwrap();
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].body.event_type, status_type::CREATED);
    }
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn test_clock_timestamps_flow_into_events() {
    let rig = rig();
    rig.clock.set_ms(42_000);
    let id = rig
        .orch
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();
    let events = rig.orch.history(&id, 0, 0).unwrap();
    assert_eq!(events[0].timestamp_ms, 42_000);
    assert_eq!(events[0].body.channel, Channel::Status);
}
