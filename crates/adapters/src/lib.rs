// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Session adapters: kind-specific process supervision.
//!
//! Each adapter implements the [`Adapter`] contract — spawn or re-attach a
//! backing process, inject input, perform kind-specific operations, and
//! emit the session's event stream through an [`EventSink`].

mod adapter;
pub mod assistant;
mod editor;
mod pty;

pub use adapter::{Adapter, AdapterError, EventSink, ProcessHandle, ResumeSpec, SpawnSpec};
pub use assistant::{AssistantAdapter, AssistantConfig};
pub use editor::EditorAdapter;
pub use pty::{PtyAdapter, PtyConfig};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{AdapterCall, FakeAdapter};
