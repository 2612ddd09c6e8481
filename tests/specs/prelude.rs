// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for kernel specs.

use sb_adapters::FakeAdapter;
use sb_core::{FakeClock, SessionId, SessionStatus};
use sb_kernel::{AdapterRegistry, Orchestrator, OrchestratorConfig, Recorder};
use sb_storage::{EventStore, WorkspaceIndex};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Kernel {
    pub adapter: FakeAdapter,
    pub orchestrator: Orchestrator,
}

/// Build a kernel over `state_dir` with one fake adapter per kind.
///
/// Building a second kernel over the same directory models a daemon
/// restart: persisted records are reloaded, live handles are gone.
pub fn kernel(state_dir: &Path, queue_cap: usize, kinds: &[&'static str]) -> Kernel {
    let clock = FakeClock::new(1_000);
    let store = Arc::new(EventStore::open(state_dir).unwrap());

    let adapter = FakeAdapter::with_kind(kinds[0]);
    let mut builder = AdapterRegistry::builder().register(Arc::new(adapter.clone()));
    for kind in &kinds[1..] {
        builder = builder.register(Arc::new(FakeAdapter::with_kind(kind)));
    }

    let recorder = Arc::new(Recorder::new(
        Arc::clone(&store),
        Arc::new(clock.clone()),
        queue_cap,
    ));
    let workspaces = Arc::new(WorkspaceIndex::load(&state_dir.join("workspaces.json")).unwrap());
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(builder.build()),
        recorder,
        workspaces,
        Arc::new(clock.clone()),
        OrchestratorConfig {
            workspaces_root: state_dir.to_owned(),
            spawn_timeout: Duration::from_secs(2),
            close_grace: Duration::from_millis(300),
        },
    );

    Kernel {
        adapter,
        orchestrator,
    }
}

/// Poll until the session's record reaches `status`.
pub async fn wait_for_status(orch: &Orchestrator, id: &SessionId, status: SessionStatus) {
    for _ in 0..300 {
        if orch.find(id).map(|r| r.status) == Some(status) && !orch.is_live(id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {} never reached {}", id, status);
}
