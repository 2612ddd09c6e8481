// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_core::Channel;

#[tokio::test]
async fn test_event_sink_delivers_in_order() {
    let (sink, mut rx) = EventSink::channel();
    sink.emit(EventBody::output_chunk(Channel::Stdout, b"one"));
    sink.emit(EventBody::output_chunk(Channel::Stdout, b"two"));

    assert_eq!(rx.recv().await.unwrap().decode_chunk().unwrap(), b"one");
    assert_eq!(rx.recv().await.unwrap().decode_chunk().unwrap(), b"two");
}

#[tokio::test]
async fn test_event_sink_emit_after_receiver_drop_is_silent() {
    let (sink, rx) = EventSink::channel();
    drop(rx);
    // Must not panic or error
    sink.emit(EventBody::exited(Some(0), None));
}

#[test]
fn test_handle_tokens_distinguish_runs() {
    let id = SessionId::new("s1");
    let first = ProcessHandle::new(id.clone());
    let second = ProcessHandle::new(id);
    assert_ne!(first.token(), second.token());
}
