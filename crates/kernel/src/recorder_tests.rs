// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_core::test_support::{session_record, stdout_chunk};
use sb_core::{status_type, FakeClock};
use tempfile::{tempdir, TempDir};

fn setup(queue_cap: usize) -> (TempDir, Arc<EventStore>, Recorder) {
    let dir = tempdir().unwrap();
    let store = Arc::new(EventStore::open(dir.path()).unwrap());
    let recorder = Recorder::new(
        Arc::clone(&store),
        Arc::new(FakeClock::new(1_000)),
        queue_cap,
    );
    (dir, store, recorder)
}

#[tokio::test]
async fn test_record_persists_before_notify() {
    let (_dir, store, recorder) = setup(16);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    let mut sub = recorder.subscribe(&id, 0).await.unwrap();

    let seq = recorder.record(&id, stdout_chunk("a\n")).await.unwrap();
    assert_eq!(seq, 1);
    // Durable already: visible via a direct store read
    assert_eq!(store.latest_seq(&id).unwrap(), 1);

    let event = sub.next().await.unwrap().unwrap();
    assert_eq!(event.seq, 1);
    assert_eq!(event.timestamp_ms, 1_000);
}

#[tokio::test]
async fn test_replay_then_live_no_gap_no_duplicate() {
    let (_dir, store, recorder) = setup(64);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    for i in 1..=5 {
        recorder
            .record(&id, stdout_chunk(&format!("{}\n", i)))
            .await
            .unwrap();
    }

    let mut sub = recorder.subscribe(&id, 2).await.unwrap();

    // Live events recorded after the join
    for i in 6..=8 {
        recorder
            .record(&id, stdout_chunk(&format!("{}\n", i)))
            .await
            .unwrap();
    }

    let mut seqs = Vec::new();
    for _ in 0..6 {
        seqs.push(sub.next().await.unwrap().unwrap().seq);
    }
    assert_eq!(seqs, vec![3, 4, 5, 6, 7, 8]);
    assert_eq!(sub.last_delivered_seq(), 8);
}

#[tokio::test]
async fn test_subscribe_from_zero_replays_everything() {
    let (_dir, store, recorder) = setup(16);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    for i in 1..=300 {
        recorder
            .record(&id, stdout_chunk(&format!("{}\n", i)))
            .await
            .unwrap();
    }

    // More than one replay page
    let mut sub = recorder.subscribe(&id, 0).await.unwrap();
    for expected in 1..=300u64 {
        assert_eq!(sub.next().await.unwrap().unwrap().seq, expected);
    }
}

#[tokio::test]
async fn test_slow_consumer_is_evicted_and_session_continues() {
    let (_dir, store, recorder) = setup(8);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    let mut slow = recorder.subscribe(&id, 0).await.unwrap();
    let mut healthy = recorder.subscribe(&id, 0).await.unwrap();

    // Overflow the slow subscriber's queue while the healthy one keeps up
    for i in 1..=40 {
        recorder
            .record(&id, stdout_chunk(&format!("{}\n", i)))
            .await
            .unwrap();
        assert_eq!(healthy.next().await.unwrap().unwrap().seq, i);
    }

    assert_eq!(recorder.subscriber_count(&id), 1);

    // The slow subscriber drains what was queued, then sees the eviction
    let mut delivered = 0u64;
    let err = loop {
        match slow.next().await {
            Ok(Some(event)) => {
                delivered += 1;
                assert_eq!(event.seq, delivered);
            }
            Ok(None) => panic!("expected slow-consumer error"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, SubscriptionError::SlowConsumer));
    assert!(delivered <= 8);

    // Everything is persisted regardless
    assert_eq!(store.latest_seq(&id).unwrap(), 40);
}

#[tokio::test]
async fn test_unsubscribe_via_drop() {
    let (_dir, store, recorder) = setup(16);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    let sub = recorder.subscribe(&id, 0).await.unwrap();
    assert_eq!(recorder.subscriber_count(&id), 1);
    drop(sub);
    assert_eq!(recorder.subscriber_count(&id), 0);

    // Recording after detach does not error
    recorder.record(&id, stdout_chunk("x\n")).await.unwrap();
}

#[tokio::test]
async fn test_storage_failure_notifies_live_subscribers() {
    let (_dir, store, recorder) = setup(16);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();
    recorder.record(&id, stdout_chunk("ok\n")).await.unwrap();

    let mut sub = recorder.subscribe(&id, 1).await.unwrap();

    // Make the next append fail
    store.delete(&id).unwrap();
    let err = recorder.record(&id, stdout_chunk("lost\n")).await;
    assert!(err.is_err());

    let notice = sub.next().await.unwrap().unwrap();
    assert_eq!(notice.body.event_type, status_type::STORAGE_ERROR);
}

#[tokio::test]
async fn test_drop_session_ends_streams_cleanly() {
    let (_dir, store, recorder) = setup(16);
    let id = SessionId::new("s1");
    store.create_session(session_record("s1")).unwrap();

    let mut sub = recorder.subscribe(&id, 0).await.unwrap();
    recorder.drop_session(&id);
    assert!(sub.next().await.unwrap().is_none());
}
