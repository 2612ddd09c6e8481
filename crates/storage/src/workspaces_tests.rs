// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

#[test]
fn test_touch_creates_and_updates() {
    let dir = tempdir().unwrap();
    let index = WorkspaceIndex::load(&dir.path().join("workspaces.json")).unwrap();

    index.touch(Path::new("/work/alpha"), 100).unwrap();
    index.touch(Path::new("/work/alpha"), 200).unwrap();

    let record = index.get(Path::new("/work/alpha")).unwrap();
    assert_eq!(record.name, "alpha");
    assert_eq!(record.last_active_at_ms, 200);
}

#[test]
fn test_list_orders_by_recency() {
    let dir = tempdir().unwrap();
    let index = WorkspaceIndex::load(&dir.path().join("workspaces.json")).unwrap();

    index.touch(Path::new("/work/old"), 100).unwrap();
    index.touch(Path::new("/work/new"), 500).unwrap();

    let names: Vec<_> = index.list().into_iter().map(|w| w.name).collect();
    assert_eq!(names, vec!["new", "old"]);
}

#[test]
fn test_persists_across_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("workspaces.json");

    {
        let index = WorkspaceIndex::load(&path).unwrap();
        index.touch(Path::new("/work/alpha"), 100).unwrap();
    }

    let index = WorkspaceIndex::load(&path).unwrap();
    assert!(index.get(Path::new("/work/alpha")).is_some());
}

#[test]
fn test_corrupt_index_starts_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("workspaces.json");
    std::fs::write(&path, b"{broken").unwrap();

    let index = WorkspaceIndex::load(&path).unwrap();
    assert!(index.list().is_empty());
}
