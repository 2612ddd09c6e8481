// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter registry: kind string to adapter, frozen after startup.

use sb_adapters::Adapter;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder used once at startup.
#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind. Last registration wins.
    pub fn register(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}

/// Immutable kind-to-adapter map; lookups are lock-free.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::new()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(kind).cloned()
    }

    /// Registered kind strings, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
