// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Reserve internal-mesh ports for a cluster and derive coordinator fragments.
// Author: Lukas Bower

use std::collections::BTreeSet;

use crate::{PortError, PortRole, PortSource};

/// Internal-mesh ports reserved for a fixed number of hosts.
///
/// The coordinator set holds `:port` fragments ordered by their string form,
/// which is the order bootstrap strings are assembled in.
#[derive(Debug, Clone)]
pub struct InternalPortSet {
    source: PortSource,
    ports: Vec<u16>,
    coordinators: BTreeSet<String>,
}

impl InternalPortSet {
    /// Reserve `host_count` internal ports from `source`, in order.
    pub fn allocate(source: &PortSource, host_count: i32) -> Result<Self, PortError> {
        let count =
            usize::try_from(host_count).map_err(|_| PortError::invalid("host count", host_count))?;
        let mut ports = Vec::with_capacity(count);
        let mut coordinators = BTreeSet::new();
        for _ in 0..count {
            let port = source.next(PortRole::Internal)?;
            ports.push(port);
            coordinators.insert(format!(":{port}"));
        }
        Ok(Self {
            source: source.clone(),
            ports,
            coordinators,
        })
    }

    /// Number of hosts the set was sized for.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.ports.len()
    }

    /// Allocated ports in allocation order.
    #[must_use]
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Unique `:port` fragments in lexicographic order.
    #[must_use]
    pub fn coordinators(&self) -> &BTreeSet<String> {
        &self.coordinators
    }

    /// Coordinator fragments joined with commas for a bootstrap argument.
    #[must_use]
    pub fn coordinator_list(&self) -> String {
        self.coordinators
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Internal port for `host_index`.
    ///
    /// Indexes inside the sized set return the reserved port. Indexes past the
    /// end draw a fresh port from the source on every call, which lets a
    /// cluster grow beyond its configured size.
    pub fn internal_port_for(&self, host_index: i32) -> Result<u16, PortError> {
        let index =
            usize::try_from(host_index).map_err(|_| PortError::invalid("host index", host_index))?;
        match self.ports.get(index) {
            Some(port) => Ok(*port),
            None => self.source.next(PortRole::Internal),
        }
    }
}
