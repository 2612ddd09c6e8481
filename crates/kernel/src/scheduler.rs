// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic jobs that run as ephemeral sessions.
//!
//! The daemon's main loop ticks [`Scheduler::fired_jobs`] and creates a
//! session per fired job. Missed beats (daemon busy or asleep) collapse
//! into a single firing.

use crate::error::KernelError;
use crate::orchestrator::Orchestrator;
use sb_core::{SessionId, SessionKind};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// A declared periodic job.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub every: Duration,
    pub kind: SessionKind,
    pub cwd: PathBuf,
    pub metadata: serde_json::Value,
    /// Optional one-shot input sent right after the session spawns.
    pub input: Option<String>,
}

struct JobState {
    job: ScheduledJob,
    next_fire: Instant,
}

/// Deadline table for declared jobs.
pub struct Scheduler {
    jobs: Vec<JobState>,
}

impl Scheduler {
    /// First firing of each job is one full interval after `now`.
    pub fn new(jobs: Vec<ScheduledJob>, now: Instant) -> Self {
        let jobs = jobs
            .into_iter()
            .map(|job| JobState {
                next_fire: now + job.every,
                job,
            })
            .collect();
        Self { jobs }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs due at `now`; each is rescheduled past `now`.
    pub fn fired_jobs(&mut self, now: Instant) -> Vec<ScheduledJob> {
        let mut fired = Vec::new();
        for state in &mut self.jobs {
            if state.next_fire > now {
                continue;
            }
            fired.push(state.job.clone());
            while state.next_fire <= now {
                state.next_fire += state.job.every;
            }
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs.iter().map(|s| s.next_fire).min()
    }
}

/// Run one fired job as an ephemeral session.
pub async fn run_job(orch: &Orchestrator, job: &ScheduledJob) -> Result<SessionId, KernelError> {
    let id = orch
        .create(job.kind.clone(), Some(job.cwd.clone()), job.metadata.clone())
        .await?;
    if let Some(ref input) = job.input {
        orch.send_input(&id, input.as_bytes()).await?;
    }
    info!(job = %job.name, session_id = %id, "scheduled job started");
    Ok(id)
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
