// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared port source combining generation with fixed overrides.
// Author: Lukas Bower

use std::sync::{Arc, Mutex};

use log::debug;

use crate::{PortError, PortGenerator, PortOverrides, PortRole};

#[derive(Debug)]
struct SourceState {
    generator: PortGenerator,
    overrides: PortOverrides,
}

/// Port source queried once per role per host.
///
/// Clones share the same cursors and override table, so the orchestrator and
/// derived views such as [`crate::InternalPortSet`] never hand out a port twice.
/// Configuration is expected to happen on the setup thread before any process
/// is spawned.
#[derive(Debug, Clone)]
pub struct PortSource {
    state: Arc<Mutex<SourceState>>,
}

impl PortSource {
    /// Create a source over `generator` with overrides disabled.
    #[must_use]
    pub fn new(generator: PortGenerator) -> Self {
        Self::with_overrides(generator, PortOverrides::new())
    }

    /// Create a source with a pre-populated override table.
    #[must_use]
    pub fn with_overrides(generator: PortGenerator, overrides: PortOverrides) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                generator,
                overrides,
            })),
        }
    }

    /// Return the port for `role`.
    ///
    /// An enabled override answers verbatim without advancing anything;
    /// otherwise the role's cursor issues a fresh port.
    pub fn next(&self, role: PortRole) -> Result<u16, PortError> {
        let mut state = self.state.lock().expect("port source lock poisoned");
        if let Some(port) = state.overrides.resolve(role) {
            debug!("override answered {role} port {port}");
            return Ok(port);
        }
        state.generator.next(role)
    }

    /// Enable the override table for the rest of this source's life.
    pub fn enable_overrides(&self) {
        self.state
            .lock()
            .expect("port source lock poisoned")
            .overrides
            .enable();
    }

    /// Pin `role` to `port` in the override table.
    pub fn set_override(&self, role: PortRole, port: u16) {
        self.state
            .lock()
            .expect("port source lock poisoned")
            .overrides
            .set(role, port);
    }

    /// Pin `role` using the integer form; negative values clear the entry.
    pub fn set_override_raw(&self, role: PortRole, value: i64) -> Result<(), PortError> {
        self.state
            .lock()
            .expect("port source lock poisoned")
            .overrides
            .set_raw(role, value)
    }

    /// Remove any override for `role`.
    pub fn clear_override(&self, role: PortRole) {
        self.state
            .lock()
            .expect("port source lock poisoned")
            .overrides
            .clear(role);
    }

    /// Snapshot of the current override table.
    #[must_use]
    pub fn overrides(&self) -> PortOverrides {
        self.state
            .lock()
            .expect("port source lock poisoned")
            .overrides
            .clone()
    }
}

impl Default for PortSource {
    fn default() -> Self {
        Self::new(PortGenerator::default())
    }
}
