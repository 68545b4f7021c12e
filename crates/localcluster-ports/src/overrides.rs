// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Deterministic fixed-port overrides for reproducible negative tests.
// Author: Lukas Bower

use std::collections::BTreeMap;

use crate::{PortError, PortRole};

/// Fixed port values answered instead of generated ones.
///
/// Overrides start disabled. Once [`PortOverrides::enable`] is called they stay
/// enabled for the lifetime of the value; entries may be changed freely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortOverrides {
    enabled: bool,
    values: BTreeMap<PortRole, u16>,
}

impl PortOverrides {
    /// Create an empty, disabled override table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn overrides on. There is no way back.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Report whether overrides are consulted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pin `role` to `port`.
    pub fn set(&mut self, role: PortRole, port: u16) {
        self.values.insert(role, port);
    }

    /// Pin `role` using the integer form where any negative value means unset.
    pub fn set_raw(&mut self, role: PortRole, value: i64) -> Result<(), PortError> {
        if value < 0 {
            self.values.remove(&role);
            return Ok(());
        }
        let port = u16::try_from(value).map_err(|_| PortError::invalid("override port", value))?;
        self.set(role, port);
        Ok(())
    }

    /// Remove the entry for `role`.
    pub fn clear(&mut self, role: PortRole) {
        self.values.remove(&role);
    }

    /// Stored value for `role`, whether or not overrides are enabled.
    #[must_use]
    pub fn get(&self, role: PortRole) -> Option<u16> {
        self.values.get(&role).copied()
    }

    /// Value to answer for `role`, only when overrides are enabled.
    #[must_use]
    pub fn resolve(&self, role: PortRole) -> Option<u16> {
        if self.enabled {
            self.get(role)
        } else {
            None
        }
    }
}
