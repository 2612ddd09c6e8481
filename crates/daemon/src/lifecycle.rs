// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use crate::auth::StaticTokenValidator;
use crate::config::ServerConfig;
use crate::listener::ListenCtx;
use crate::protocol::ServerCaps;
use fs2::FileExt;
use sb_adapters::{
    AssistantAdapter, AssistantConfig, EditorAdapter, PtyAdapter, PtyConfig,
};
use sb_core::SystemClock;
use sb_kernel::{
    reconcile, AdapterRegistry, Orchestrator, OrchestratorConfig, Recorder, RecoveryReport,
    Scheduler,
};
use sb_storage::{EventStore, StoreError, WorkspaceIndex};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind port {0}: {1}")]
    BindFailed(u16, std::io::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem layout under the state directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub workspaces_path: PathBuf,
}

impl Paths {
    /// Resolve paths from the config, defaulting to
    /// `$XDG_STATE_HOME/switchboard` (or `~/.local/state/switchboard`).
    pub fn resolve(config: &ServerConfig) -> Result<Self, LifecycleError> {
        let state_dir = match &config.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::state_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
                .ok_or(LifecycleError::NoStateDir)?
                .join("switchboard"),
        };
        Ok(Self {
            lock_path: state_dir.join("daemon.pid"),
            log_path: state_dir.join("daemon.log"),
            workspaces_path: state_dir.join("workspaces.json"),
            state_dir,
        })
    }
}

/// The running daemon.
pub struct Daemon {
    pub config: ServerConfig,
    pub paths: Paths,
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub orchestrator: Arc<Orchestrator>,
    pub start_time: Instant,
}

/// Result of startup: the daemon plus the pieces the main loop drives.
pub struct StartupResult {
    pub daemon: Daemon,
    pub listener: TcpListener,
    pub listen_ctx: Arc<ListenCtx>,
    pub scheduler: Scheduler,
    pub recovery: RecoveryReport,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon: lock, open storage, build the kernel, reconcile
/// persisted sessions, and bind the transport.
///
/// Reconciliation runs before the bind so no client can attach until
/// every persisted `running` session has settled (spec'd recovery order).
pub async fn startup(config: ServerConfig) -> Result<StartupResult, LifecycleError> {
    let paths = Paths::resolve(&config)?;
    std::fs::create_dir_all(&paths.state_dir)?;

    // Exclusive lock + PID file
    let mut lock_file = File::options()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let store = Arc::new(EventStore::open(&paths.state_dir)?);
    let workspaces = Arc::new(WorkspaceIndex::load(&paths.workspaces_path)?);

    let registry = Arc::new(
        AdapterRegistry::builder()
            .register(Arc::new(PtyAdapter::new(PtyConfig {
                default_shell: config.default_shell.clone(),
                ..PtyConfig::default()
            })))
            .register(Arc::new(AssistantAdapter::new(AssistantConfig {
                bypass_permissions: config.bypass_permissions,
                ..AssistantConfig::default()
            })))
            .register(Arc::new(EditorAdapter::new()))
            .build(),
    );

    let clock = Arc::new(SystemClock);
    let recorder = Arc::new(Recorder::new(
        Arc::clone(&store),
        clock.clone(),
        config.max_subscriber_queue,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        Arc::clone(&registry),
        recorder,
        workspaces,
        clock,
        OrchestratorConfig {
            workspaces_root: config.workspaces_root.clone(),
            spawn_timeout: config.spawn_timeout(),
            close_grace: Duration::from_secs(5),
        },
    ));

    // Reconcile persisted sessions before accepting any attachments
    let recovery = reconcile(&orchestrator).await;

    let listener = TcpListener::bind(("127.0.0.1", config.port))
        .await
        .map_err(|e| LifecycleError::BindFailed(config.port, e))?;

    if config.auth_token.is_none() {
        warn!("no auth_token configured; every connection will be rejected");
    }

    let shutdown = CancellationToken::new();
    let listen_ctx = Arc::new(ListenCtx {
        orchestrator: Arc::clone(&orchestrator),
        auth: Arc::new(StaticTokenValidator::new(config.auth_token.clone())),
        server_caps: ServerCaps {
            protocol_version: crate::protocol::PROTOCOL_VERSION,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            kinds: registry.kinds().iter().map(|k| k.to_string()).collect(),
        },
        heartbeat: config.heartbeat(),
        pong_deadline: config.pong_deadline(),
        shutdown: shutdown.clone(),
    });

    let scheduler = Scheduler::new(config.scheduled_jobs(), Instant::now());

    info!(
        port = config.port,
        state_dir = %paths.state_dir.display(),
        resumed = recovery.resumed.len(),
        stopped = recovery.stopped.len(),
        "daemon started"
    );

    Ok(StartupResult {
        daemon: Daemon {
            config,
            paths,
            lock_file,
            orchestrator,
            start_time: Instant::now(),
        },
        listener,
        listen_ctx,
        scheduler,
        recovery,
        shutdown,
    })
}

impl Daemon {
    /// Graceful shutdown: close every live session, then release files.
    pub async fn shutdown(&mut self) {
        info!("shutting down daemon...");
        self.orchestrator.shutdown_all().await;

        if self.paths.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.lock_path) {
                warn!(error = %e, "failed to remove PID file");
            }
        }
        info!("daemon shutdown complete");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
