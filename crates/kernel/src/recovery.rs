// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot-time reconciliation of persisted sessions with live processes.
//!
//! Runs synchronously at startup, before the transport accepts
//! attachments. Every session persisted `running` either resumes (and
//! stays `running`) or is stopped with a `status:recovered-as-stopped`
//! event; there is no intermediate observable state.

use crate::orchestrator::Orchestrator;
use sb_core::{status_type, EventBody, SessionId, SessionStatus};
use tracing::{info, warn};

/// What reconciliation did to each recovered session.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<SessionId>,
    pub stopped: Vec<SessionId>,
}

/// Reconcile persisted `running` sessions with reality.
pub async fn reconcile(orch: &Orchestrator) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    for record in orch.store().list_sessions() {
        if record.status != SessionStatus::Running || orch.is_live(&record.id) {
            continue;
        }

        match orch.resume(&record.id).await {
            Ok(outcome) if outcome.resumed => {
                info!(session_id = %record.id, kind = %record.kind, "session resumed at startup");
                report.resumed.push(record.id);
            }
            Ok(_) => {
                // A live handle appeared between the scan and the resume;
                // nothing to reconcile.
            }
            Err(e) => {
                warn!(
                    session_id = %record.id,
                    kind = %record.kind,
                    error = %e,
                    "resume failed at startup, stopping session"
                );
                if let Err(e) = orch
                    .recorder()
                    .record(
                        &record.id,
                        EventBody::status(
                            status_type::RECOVERED_AS_STOPPED,
                            serde_json::json!({ "reason": e.to_string() }),
                        ),
                    )
                    .await
                {
                    warn!(session_id = %record.id, error = %e, "failed to record recovery event");
                }
                if let Err(e) = orch.store().update_status(
                    &record.id,
                    SessionStatus::Stopped,
                    orch.now_ms(),
                ) {
                    warn!(session_id = %record.id, error = %e, "failed to mark session stopped");
                }
                report.stopped.push(record.id);
            }
        }
    }

    if !report.resumed.is_empty() || !report.stopped.is_empty() {
        info!(
            resumed = report.resumed.len(),
            stopped = report.stopped.len(),
            "startup reconciliation complete"
        );
    }
    report
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
