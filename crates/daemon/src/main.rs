// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard daemon (sbd)
//!
//! Supervises interactive sessions, persists their event streams, and
//! serves the WebSocket transport.
//!
//! Architecture:
//! - Listener task: accepts transport connections, one task per client
//! - Session pumps: one task per live session feeding the recorder
//! - Main loop: scheduler ticks, retention sweeps, signal handling

use sb_daemon::lifecycle::{self, StartupResult};
use sb_daemon::ServerConfig;
use sb_daemon::{listener::Listener, ConfigError};
use sb_kernel::{prune_expired, run_job};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Scheduler tick resolution.
const SCHEDULER_TICK: Duration = Duration::from_secs(1);

/// Retention sweep interval.
const RETENTION_SWEEP: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("sbd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                let Some(path) = args.next() else {
                    eprintln!("error: --config requires a path");
                    std::process::exit(1);
                };
                config_path = Some(PathBuf::from(path));
            }
            other => {
                eprintln!("error: unexpected argument '{other}'");
                eprintln!("Usage: sbd [--config <path>] [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = load_config(config_path)?;
    let paths = lifecycle::Paths::resolve(&config)?;
    std::fs::create_dir_all(&paths.state_dir)?;
    rotate_log_if_needed(&paths.log_path);
    let _log_guard = setup_logging(&paths.log_path)?;

    info!("starting switchboard daemon");

    let StartupResult {
        mut daemon,
        listener,
        listen_ctx,
        mut scheduler,
        recovery,
        shutdown,
    } = match lifecycle::startup(config).await {
        Ok(result) => result,
        Err(lifecycle::LifecycleError::LockFailed(_)) => {
            let pid = std::fs::read_to_string(&paths.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("sbd is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to start daemon");
            return Err(e.into());
        }
    };

    if !recovery.stopped.is_empty() {
        info!(
            stopped = recovery.stopped.len(),
            "sessions recovered as stopped at startup"
        );
    }

    tokio::spawn(Listener::new(listener, Arc::clone(&listen_ctx)).run());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    // NOTE: intervals are created outside the loop — tokio::select!
    // re-evaluates branches each iteration, and a sleep() inside would
    // reset on every event.
    let mut scheduler_tick = tokio::time::interval(SCHEDULER_TICK);
    let mut retention_tick = tokio::time::interval(RETENTION_SWEEP);
    retention_tick.tick().await; // skip the immediate first firing

    info!("daemon ready");
    println!("READY");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down...");
                break;
            }

            _ = sigint.recv() => {
                info!("received SIGINT, shutting down...");
                break;
            }

            _ = scheduler_tick.tick(), if !scheduler.is_empty() => {
                for job in scheduler.fired_jobs(std::time::Instant::now()) {
                    match run_job(&daemon.orchestrator, &job).await {
                        Ok(id) => info!(job = %job.name, session_id = %id, "scheduled job session created"),
                        Err(e) => warn!(job = %job.name, error = %e, "scheduled job failed"),
                    }
                }
            }

            _ = retention_tick.tick() => {
                let now_ms = epoch_ms_now();
                let retention_days = daemon.config.retention_days;
                let pruned = prune_expired(&daemon.orchestrator, retention_days, now_ms);
                if !pruned.is_empty() {
                    info!(count = pruned.len(), "retention sweep pruned sessions");
                }
            }
        }
    }

    shutdown.cancel();
    daemon.shutdown().await;
    info!("daemon stopped");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<ServerConfig, ConfigError> {
    match path {
        Some(path) => ServerConfig::load(&path),
        None => {
            let default_path = dirs::config_dir()
                .map(|d| d.join("switchboard").join("config.toml"));
            match default_path {
                Some(path) => ServerConfig::load(&path),
                None => Ok(ServerConfig::default()),
            }
        }
    }
}

fn epoch_ms_now() -> u64 {
    use sb_core::Clock;
    sb_core::SystemClock.epoch_ms()
}

fn print_help() {
    println!("sbd {}", env!("CARGO_PKG_VERSION"));
    println!("Switchboard daemon - supervises interactive sessions and serves the transport");
    println!();
    println!("USAGE:");
    println!("    sbd [--config <path>]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <path>  Path to a TOML config file");
    println!("    -h, --help           Print help information");
    println!("    -v, --version        Print version information");
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep.
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log if it exceeds [`MAX_LOG_SIZE`].
///
/// Best-effort: rotation failures never stop the daemon from starting.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    log_path: &std::path::Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let dir = log_path.parent().ok_or("log path has no parent")?;
    let file_name = log_path.file_name().ok_or("log path has no file name")?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
