// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accept loop for the WebSocket transport.
//!
//! Each accepted connection is served on its own task; the engine of the
//! daemon (orchestrator, recorder) is shared through [`ListenCtx`].

use crate::auth::AuthValidator;
use crate::conn::{self, ConnectionError};
use crate::protocol::{ProtocolError, ServerCaps};
use sb_kernel::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Shared daemon context for all connections.
pub struct ListenCtx {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: Arc<dyn AuthValidator>,
    pub server_caps: ServerCaps,
    pub heartbeat: Duration,
    pub pong_deadline: Duration,
    pub shutdown: CancellationToken,
}

/// Listener task accepting transport connections.
pub struct Listener {
    tcp: TcpListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { tcp, ctx }
    }

    /// Run until shutdown, spawning a task per connection.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.tcp.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let ctx = Arc::clone(&self.ctx);
                            tokio::spawn(async move {
                                match conn::handle_connection(stream, &ctx).await {
                                    Ok(()) => {}
                                    Err(ConnectionError::Closed) => debug!(%peer, "client disconnected"),
                                    Err(ConnectionError::HandshakeTimeout) => {
                                        warn!(%peer, "handshake timeout")
                                    }
                                    Err(ConnectionError::AuthRequired) => {
                                        warn!(%peer, "rejected unauthenticated connection")
                                    }
                                    Err(ConnectionError::Protocol(ProtocolError::Version(v))) => {
                                        warn!(%peer, version = v, "unsupported protocol version")
                                    }
                                    Err(e) => error!(%peer, error = %e, "connection error"),
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "accept error"),
                    }
                }
                _ = self.ctx.shutdown.cancelled() => break,
            }
        }
    }
}
