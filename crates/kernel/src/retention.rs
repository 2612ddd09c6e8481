// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention sweep: delete stopped sessions past the retention window.

use crate::orchestrator::Orchestrator;
use sb_core::{SessionId, SessionStatus};
use tracing::{info, warn};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Delete stopped sessions idle longer than `retention_days`.
///
/// Idle (suspended) sessions are kept: the user parked them on purpose.
pub fn prune_expired(orch: &Orchestrator, retention_days: u32, now_ms: u64) -> Vec<SessionId> {
    let horizon_ms = u64::from(retention_days) * DAY_MS;
    let mut pruned = Vec::new();

    for record in orch.store().list_sessions() {
        if record.status != SessionStatus::Stopped {
            continue;
        }
        if now_ms.saturating_sub(record.updated_at_ms) < horizon_ms {
            continue;
        }
        match orch.delete(&record.id) {
            Ok(()) => pruned.push(record.id),
            Err(e) => warn!(session_id = %record.id, error = %e, "retention delete failed"),
        }
    }

    if !pruned.is_empty() {
        info!(count = pruned.len(), retention_days, "pruned expired sessions");
    }
    pruned
}

#[cfg(test)]
#[path = "retention_tests.rs"]
mod tests;
