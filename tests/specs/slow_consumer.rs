// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slow-consumer eviction preserves system liveness.

use crate::prelude::*;
use sb_core::SessionKind;
use sb_kernel::SubscriptionError;
use tempfile::tempdir;

const QUEUE_CAP: usize = 64;

#[tokio::test]
async fn never_reading_subscriber_is_evicted_others_see_everything() {
    let dir = tempdir().unwrap();
    let k = kernel(dir.path(), QUEUE_CAP, &["pty"]);

    let id = k
        .orchestrator
        .create(SessionKind::pty(), None, serde_json::Value::Null)
        .await
        .unwrap();

    // One subscriber that never reads, one that keeps up
    let mut stalled = k.orchestrator.attach(&id, 0).await.unwrap();
    let mut healthy = k.orchestrator.attach(&id, 0).await.unwrap();

    // Drive 2000 events through the session (seqs 2..=2001)
    for batch in 0..20 {
        k.adapter.emit_chunks(&id, batch * 100 + 1, 100);
        // Drain the healthy subscriber so it is never evicted; the first
        // batch also carries the status:created event
        let drain = if batch == 0 { 101 } else { 100 };
        for _ in 0..drain {
            healthy.next().await.unwrap().unwrap();
        }
    }
    // The created event plus 2000 chunks
    assert_eq!(healthy.last_delivered_seq(), 2_001);

    // The stalled subscriber drains at most its queue bound, then errors
    let mut delivered = 0usize;
    let err = loop {
        match stalled.next().await {
            Ok(Some(event)) => {
                delivered += 1;
                assert_eq!(event.seq, delivered as u64);
            }
            Ok(None) => panic!("expected eviction, got clean end"),
            Err(e) => break e,
        }
    };
    assert!(matches!(err, SubscriptionError::SlowConsumer));
    // Queue bound plus the replayed prefix delivered before the live tail
    assert!(
        delivered <= QUEUE_CAP + 1,
        "delivered {} exceeds queue bound",
        delivered
    );

    // Everything was persisted despite the eviction
    let events = k.orchestrator.history(&id, 0, 0).unwrap();
    assert_eq!(events.len(), 2_001);

    // The evicted client reconnects from its last seq and catches up
    let mut reattached = k
        .orchestrator
        .attach(&id, delivered as u64)
        .await
        .unwrap();
    let mut next = delivered as u64 + 1;
    while next <= 2_001 {
        assert_eq!(reattached.next().await.unwrap().unwrap().seq, next);
        next += 1;
    }
}
