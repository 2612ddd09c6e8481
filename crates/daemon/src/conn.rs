// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection handling for the transport multiplexer.
//!
//! One WebSocket connection carries a `hello` handshake, then any number
//! of concurrent session attachments. Each attachment runs its own
//! outbound task pumping a recorder subscription into the shared writer;
//! per-session order is preserved end to end, cross-session order is not.

use crate::listener::ListenCtx;
use crate::protocol::{self, ClientMessage, ProtocolError, ServerMessage};
use base64::Engine;
use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use sb_core::SessionId;
use sb_kernel::{KernelError, Subscription, SubscriptionError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound frames buffered per connection before the socket write.
const WRITER_QUEUE: usize = 256;

/// Errors from connection handling.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    Closed,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("authentication required")]
    AuthRequired,
}

struct Attachment {
    task: tokio::task::JoinHandle<()>,
    last_delivered: Arc<AtomicU64>,
}

/// Serve one client connection to completion.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    ctx: &Arc<ListenCtx>,
) -> Result<(), ConnectionError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut reader) = ws.split();

    // Single writer task serializes all outbound frames
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(WRITER_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let result = serve(&mut reader, &out_tx, ctx).await;

    drop(out_tx); // writer drains the queue, then closes the socket
    let _ = writer.await;
    result
}

async fn serve(
    reader: &mut SplitStream<WebSocketStream<TcpStream>>,
    out_tx: &mpsc::Sender<Message>,
    ctx: &Arc<ListenCtx>,
) -> Result<(), ConnectionError> {
    // Handshake: the first frame must be hello, within the pong deadline
    let first = tokio::time::timeout(ctx.pong_deadline, next_text(reader))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;
    let ClientMessage::Hello { client_id, token } = protocol::decode(&first)? else {
        send(out_tx, &ServerMessage::error("protocol-error", "expected hello", None)).await;
        return Err(ProtocolError::Malformed("expected hello".to_string()).into());
    };

    let Some(principal) = ctx.auth.principal(token.as_deref()) else {
        send(
            out_tx,
            &ServerMessage::error("auth-required", "no principal for token", None),
        )
        .await;
        return Err(ConnectionError::AuthRequired);
    };

    info!(client_id, subject = %principal.subject, "client connected");
    send(
        out_tx,
        &ServerMessage::Welcome {
            server_caps: ctx.server_caps.clone(),
        },
    )
    .await;

    let mut attachments: HashMap<String, Attachment> = HashMap::new();
    // Cancelled by an attachment task when its subscriber is evicted;
    // per the drop policy the whole socket closes.
    let slow_consumer = CancellationToken::new();
    let mut heartbeat = tokio::time::interval(ctx.heartbeat);
    heartbeat.tick().await; // immediate first tick
    let mut last_pong = Instant::now();

    let result = loop {
        tokio::select! {
            msg = reader.next() => {
                match msg {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(ConnectionError::Ws(e)),
                    Some(Ok(Message::Close(_))) => break Ok(()),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = out_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        match protocol::decode::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Pong) => last_pong = Instant::now(),
                            Ok(msg) => {
                                handle_message(msg, ctx, out_tx, &mut attachments, &slow_consumer)
                                    .await;
                            }
                            Err(e) => {
                                send(
                                    out_tx,
                                    &ServerMessage::error("protocol-error", e.to_string(), None),
                                )
                                .await;
                            }
                        }
                    }
                    Some(Ok(_)) => {} // binary/pong frames ignored
                }
            }

            _ = heartbeat.tick() => {
                if last_pong.elapsed() > ctx.pong_deadline {
                    warn!(client_id, "pong deadline exceeded, closing connection");
                    break Ok(());
                }
                send(out_tx, &ServerMessage::Ping).await;
                // Opportunistic acks double as per-session heartbeats
                for (session_id, attachment) in &attachments {
                    send(
                        out_tx,
                        &ServerMessage::Ack {
                            session_id: session_id.clone(),
                            seq: attachment.last_delivered.load(Ordering::SeqCst),
                        },
                    )
                    .await;
                }
            }

            _ = slow_consumer.cancelled() => {
                debug!(client_id, "closing connection after slow-consumer eviction");
                break Ok(());
            }

            _ = ctx.shutdown.cancelled() => break Ok(()),
        }
    };

    for (_, attachment) in attachments.drain() {
        // Aborting drops the Subscription, which detaches it
        attachment.task.abort();
    }
    info!(client_id, "client disconnected");
    result
}

async fn handle_message(
    msg: ClientMessage,
    ctx: &Arc<ListenCtx>,
    out_tx: &mpsc::Sender<Message>,
    attachments: &mut HashMap<String, Attachment>,
    slow_consumer: &CancellationToken,
) {
    match msg {
        ClientMessage::Hello { .. } => {
            send(
                out_tx,
                &ServerMessage::error("protocol-error", "duplicate hello", None),
            )
            .await;
        }

        ClientMessage::Ping => send(out_tx, &ServerMessage::Pong).await,
        ClientMessage::Pong => {} // handled in the read loop

        ClientMessage::Attach {
            session_id,
            from_seq,
        } => {
            if attachments.contains_key(&session_id) {
                send(
                    out_tx,
                    &ServerMessage::error(
                        "already-attached",
                        "session already attached on this connection",
                        Some(session_id),
                    ),
                )
                .await;
                return;
            }
            match ctx
                .orchestrator
                .attach(&SessionId::new(session_id.clone()), from_seq)
                .await
            {
                Ok(subscription) => {
                    let attachment = spawn_attachment(
                        session_id.clone(),
                        subscription,
                        out_tx.clone(),
                        slow_consumer.clone(),
                    );
                    attachments.insert(session_id, attachment);
                }
                Err(e) => send_kernel_error(out_tx, &e, Some(session_id)).await,
            }
        }

        ClientMessage::Detach { session_id } => {
            if let Some(attachment) = attachments.remove(&session_id) {
                attachment.task.abort();
                debug!(session_id, "detached");
            }
        }

        ClientMessage::Input {
            session_id,
            payload,
        } => {
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    send(
                        out_tx,
                        &ServerMessage::error(
                            "bad-args",
                            format!("payload is not base64: {}", e),
                            Some(session_id),
                        ),
                    )
                    .await;
                    return;
                }
            };
            if let Err(e) = ctx
                .orchestrator
                .send_input(&SessionId::new(session_id.clone()), &bytes)
                .await
            {
                send_kernel_error(out_tx, &e, Some(session_id)).await;
            }
        }

        ClientMessage::Op {
            session_id,
            name,
            args,
        } => {
            if let Err(e) = ctx
                .orchestrator
                .perform(&SessionId::new(session_id.clone()), &name, args)
                .await
            {
                send_kernel_error(out_tx, &e, Some(session_id)).await;
            }
        }

        ClientMessage::Close { session_id } => {
            if let Err(e) = ctx
                .orchestrator
                .close(&SessionId::new(session_id.clone()))
                .await
            {
                send_kernel_error(out_tx, &e, Some(session_id)).await;
            }
        }
    }
}

/// Pump one subscription into the connection writer.
fn spawn_attachment(
    session_id: String,
    mut subscription: Subscription,
    out_tx: mpsc::Sender<Message>,
    slow_consumer: CancellationToken,
) -> Attachment {
    let last_delivered = Arc::new(AtomicU64::new(subscription.last_delivered_seq()));
    let last = Arc::clone(&last_delivered);

    let task = tokio::spawn(async move {
        loop {
            match subscription.next().await {
                Ok(Some(event)) => {
                    let seq = event.seq;
                    let frame = match protocol::encode(&ServerMessage::from(event)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(session_id, error = %e, "dropping unencodable event");
                            continue;
                        }
                    };
                    if out_tx.send(Message::text(frame)).await.is_err() {
                        break; // connection gone
                    }
                    last.store(seq, Ordering::SeqCst);
                }
                Ok(None) => {
                    // Session deleted or recorder torn down
                    let frame = ServerMessage::error(
                        "detached",
                        "event stream ended",
                        Some(session_id.clone()),
                    );
                    if let Ok(frame) = protocol::encode(&frame) {
                        let _ = out_tx.send(Message::text(frame)).await;
                    }
                    break;
                }
                Err(SubscriptionError::SlowConsumer) => {
                    warn!(session_id, "subscriber evicted as slow consumer");
                    let frame = ServerMessage::error(
                        "slow-consumer",
                        "subscriber queue overflowed; reattach from last acked seq",
                        Some(session_id.clone()),
                    );
                    if let Ok(frame) = protocol::encode(&frame) {
                        let _ = out_tx.send(Message::text(frame)).await;
                    }
                    slow_consumer.cancel();
                    break;
                }
                Err(SubscriptionError::Storage(e)) => {
                    warn!(session_id, error = %e, "subscription storage failure");
                    let frame = ServerMessage::error(
                        "storage-error",
                        e.to_string(),
                        Some(session_id.clone()),
                    );
                    if let Ok(frame) = protocol::encode(&frame) {
                        let _ = out_tx.send(Message::text(frame)).await;
                    }
                    break;
                }
            }
        }
    });

    Attachment {
        task,
        last_delivered,
    }
}

async fn next_text(
    reader: &mut SplitStream<WebSocketStream<TcpStream>>,
) -> Result<String, ConnectionError> {
    loop {
        match reader.next().await {
            None => return Err(ConnectionError::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Close(_))) => return Err(ConnectionError::Closed),
            Some(Ok(_)) => continue,
        }
    }
}

async fn send(out_tx: &mpsc::Sender<Message>, msg: &ServerMessage) {
    match protocol::encode(msg) {
        Ok(frame) => {
            let _ = out_tx.send(Message::text(frame)).await;
        }
        Err(e) => warn!(error = %e, "failed to encode server message"),
    }
}

async fn send_kernel_error(
    out_tx: &mpsc::Sender<Message>,
    error: &KernelError,
    session_id: Option<String>,
) {
    send(
        out_tx,
        &ServerMessage::error(kernel_error_code(error), error.to_string(), session_id),
    )
    .await;
}

fn kernel_error_code(error: &KernelError) -> &'static str {
    use sb_adapters::AdapterError;
    match error {
        KernelError::UnknownKind(_) => "unknown-kind",
        KernelError::SessionNotFound(_) => "session-not-found",
        KernelError::SessionNotLive(_) => "session-not-live",
        KernelError::SessionRunning(_) => "session-running",
        KernelError::CreateFailed(_) => "create-failed",
        KernelError::Storage(_) => "storage-error",
        KernelError::Adapter(AdapterError::SpawnFailed(_)) => "spawn-failed",
        KernelError::Adapter(AdapterError::SpawnTimeout(_)) => "spawn-timeout",
        KernelError::Adapter(AdapterError::ResumeUnsupported(_)) => "resume-unsupported",
        KernelError::Adapter(AdapterError::ClosedSink) => "closed-sink",
        KernelError::Adapter(AdapterError::UnsupportedOperation(_)) => "unsupported-operation",
        KernelError::Adapter(AdapterError::BadArgs(_)) => "bad-args",
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
