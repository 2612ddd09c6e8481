// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event recorder: persist-then-notify with per-subscriber fan-out.
//!
//! Every event any adapter produces flows through [`Recorder::record`],
//! which holds a per-session append lock across the append + broadcast
//! critical section. That gives three guarantees subscribers rely on:
//!
//! 1. An event is durable before any subscriber sees it.
//! 2. Per-session delivery order matches `seq` order, with no gaps.
//! 3. A subscriber joining at `from_seq` sees replay `[from_seq+1, latest]`
//!    followed by live events, with no gap or duplicate at the boundary —
//!    `subscribe` snapshots `latest` and joins the live set under the same
//!    append lock.
//!
//! Fan-out is non-blocking: each subscriber owns a bounded queue, and a
//! subscriber whose queue is full is evicted (`SlowConsumer`) rather than
//! stalling the session. Evicted clients reconnect and replay from their
//! last acknowledged seq; nothing is lost because events are persisted
//! first.

use parking_lot::Mutex;
use sb_core::{status_type, Clock, EventBody, SessionEvent, SessionId, SubscriberId};
use sb_storage::{EventStore, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Events fetched per page while replaying history.
const REPLAY_PAGE: usize = 256;

/// Errors surfaced by a subscription stream.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscriber's queue overflowed and it was evicted.
    #[error("subscriber evicted: slow consumer")]
    SlowConsumer,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

struct SubscriberSlot {
    id: SubscriberId,
    tx: mpsc::Sender<SessionEvent>,
    evicted: Arc<AtomicBool>,
}

struct SessionFanout {
    /// Serializes append + broadcast, and the replay-snapshot-then-join
    /// step of `subscribe`. Never held across subscriber delivery waits —
    /// fan-out uses `try_send` only.
    append_lock: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<SubscriberSlot>>,
}

/// Couples event persistence with live subscriber fan-out.
pub struct Recorder {
    store: Arc<EventStore>,
    clock: Arc<dyn Clock>,
    queue_cap: usize,
    sessions: Mutex<HashMap<SessionId, Arc<SessionFanout>>>,
}

impl Recorder {
    pub fn new(store: Arc<EventStore>, clock: Arc<dyn Clock>, queue_cap: usize) -> Self {
        Self {
            store,
            clock,
            queue_cap: queue_cap.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn fanout(&self, id: &SessionId) -> Arc<SessionFanout> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(id.clone()).or_insert_with(|| {
            Arc::new(SessionFanout {
                append_lock: tokio::sync::Mutex::new(()),
                subscribers: Mutex::new(Vec::new()),
            })
        }))
    }

    /// Persist an event and broadcast it to the session's subscribers.
    ///
    /// Returns the assigned seq. On a storage failure nothing is
    /// persisted; live subscribers get a non-persisted
    /// `status:storage-error` notice and the error is returned so the
    /// orchestrator can close the session.
    pub async fn record(&self, id: &SessionId, body: EventBody) -> Result<u64, StoreError> {
        let fanout = self.fanout(id);
        let _append = fanout.append_lock.lock().await;

        let timestamp_ms = self.clock.epoch_ms();
        let seq = match self.store.append(id, body.clone(), timestamp_ms) {
            Ok(seq) => seq,
            Err(e) => {
                warn!(session_id = %id, error = %e, "append failed, notifying live subscribers");
                let notice_seq = self.store.latest_seq(id).map(|s| s + 1).unwrap_or(0);
                let notice = SessionEvent::new(
                    id.clone(),
                    notice_seq,
                    EventBody::status(
                        status_type::STORAGE_ERROR,
                        serde_json::json!({ "message": e.to_string() }),
                    ),
                    timestamp_ms,
                );
                broadcast(&fanout, notice);
                return Err(e);
            }
        };

        broadcast(&fanout, SessionEvent::new(id.clone(), seq, body, timestamp_ms));
        Ok(seq)
    }

    /// Attach a subscriber at `from_seq`.
    ///
    /// The returned [`Subscription`] yields replayed events first, then
    /// live events, in strict seq order with no gap at the handover.
    pub async fn subscribe(
        &self,
        id: &SessionId,
        from_seq: u64,
    ) -> Result<Subscription, StoreError> {
        let fanout = self.fanout(id);
        let sub_id = SubscriberId::generate();
        let evicted = Arc::new(AtomicBool::new(false));

        let (replay_until, rx) = {
            let _append = fanout.append_lock.lock().await;
            // Snapshot + join under the lock: live events after this point
            // all have seq > replay_until.
            let replay_until = self.store.latest_seq(id)?;
            let (tx, rx) = mpsc::channel(self.queue_cap);
            fanout.subscribers.lock().push(SubscriberSlot {
                id: sub_id.clone(),
                tx,
                evicted: Arc::clone(&evicted),
            });
            (replay_until, rx)
        };

        debug!(
            session_id = %id,
            subscriber_id = %sub_id,
            from_seq,
            replay_until,
            "subscriber attached"
        );

        Ok(Subscription {
            id: sub_id,
            session_id: id.clone(),
            store: Arc::clone(&self.store),
            cursor: from_seq,
            replay_until,
            replay_buf: VecDeque::new(),
            rx,
            evicted,
            fanout: Arc::downgrade(&fanout),
        })
    }

    /// Drop all fan-out state for a deleted session.
    pub fn drop_session(&self, id: &SessionId) {
        self.sessions.lock().remove(id);
    }

    /// Live subscriber count (diagnostics and tests).
    pub fn subscriber_count(&self, id: &SessionId) -> usize {
        self.sessions
            .lock()
            .get(id)
            .map(|f| f.subscribers.lock().len())
            .unwrap_or(0)
    }
}

/// Deliver to every subscriber; evict the ones whose queues are full.
fn broadcast(fanout: &SessionFanout, event: SessionEvent) {
    let mut subscribers = fanout.subscribers.lock();
    subscribers.retain(|slot| match slot.tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                session_id = %event.session_id,
                subscriber_id = %slot.id,
                "subscriber queue full, evicting slow consumer"
            );
            slot.evicted.store(true, Ordering::SeqCst);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    });
}

/// A live attachment to one session's event stream.
///
/// Yields replay then live events via [`Subscription::next`]. Dropping the
/// subscription detaches it.
pub struct Subscription {
    id: SubscriberId,
    session_id: SessionId,
    store: Arc<EventStore>,
    /// Seq of the last event handed to the consumer.
    cursor: u64,
    /// Upper bound of the replay range snapshotted at join time.
    replay_until: u64,
    replay_buf: VecDeque<SessionEvent>,
    rx: mpsc::Receiver<SessionEvent>,
    evicted: Arc<AtomicBool>,
    fanout: Weak<SessionFanout>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Seq of the last delivered event (the initial `from_seq` before any).
    pub fn last_delivered_seq(&self) -> u64 {
        self.cursor
    }

    /// Next event in strict seq order.
    ///
    /// `Ok(None)` means the stream ended cleanly (session deleted or
    /// recorder torn down); `Err(SlowConsumer)` means this subscriber was
    /// evicted and must reattach from `last_delivered_seq()`.
    pub async fn next(&mut self) -> Result<Option<SessionEvent>, SubscriptionError> {
        loop {
            if self.cursor < self.replay_until {
                if self.replay_buf.is_empty() {
                    let page =
                        self.store
                            .events_since(&self.session_id, self.cursor, REPLAY_PAGE)?;
                    if page.is_empty() {
                        // Purged mid-replay; fall through to live tail
                        self.cursor = self.replay_until;
                        continue;
                    }
                    self.replay_buf.extend(page);
                }
                if let Some(event) = self.replay_buf.pop_front() {
                    self.cursor = event.seq;
                    return Ok(Some(event));
                }
            } else {
                match self.rx.recv().await {
                    // Joined before replay finished; skip anything already
                    // replayed. Storage-error notices are never persisted
                    // and carry a placeholder seq, so they bypass the guard.
                    Some(event)
                        if event.seq <= self.cursor
                            && event.body.event_type != status_type::STORAGE_ERROR =>
                    {
                        continue
                    }
                    Some(event) => {
                        if event.body.event_type != status_type::STORAGE_ERROR {
                            self.cursor = event.seq;
                        }
                        return Ok(Some(event));
                    }
                    None => {
                        if self.evicted.load(Ordering::SeqCst) {
                            return Err(SubscriptionError::SlowConsumer);
                        }
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.subscribers.lock().retain(|slot| slot.id != self.id);
        }
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
