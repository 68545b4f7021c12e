// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Snapshot one port per role for every host of a cluster.
// Author: Lukas Bower

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{InternalPortSet, PortError, PortRole, PortSource};

/// Ports assigned to a single host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPorts {
    /// Host index within the cluster.
    pub host: usize,
    /// Port per role.
    pub ports: BTreeMap<PortRole, u16>,
}

impl HostPorts {
    /// Port assigned to `role`.
    #[must_use]
    pub fn port(&self, role: PortRole) -> Option<u16> {
        self.ports.get(&role).copied()
    }
}

/// Port layout for a whole cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortPlan {
    /// Per-host assignments in host order.
    pub hosts: Vec<HostPorts>,
    /// Coordinator fragments for the internal mesh.
    pub coordinators: Vec<String>,
}

impl PortPlan {
    /// Build a plan for `host_count` hosts.
    ///
    /// Internal ports are reserved first through an [`InternalPortSet`]; the
    /// remaining roles are drawn host by host.
    pub fn build(source: &PortSource, host_count: i32) -> Result<Self, PortError> {
        let internal = InternalPortSet::allocate(source, host_count)?;
        let mut hosts = Vec::with_capacity(internal.host_count());
        for (host, internal_port) in internal.ports().iter().enumerate() {
            let mut ports = BTreeMap::new();
            for role in PortRole::ALL {
                let port = if role == PortRole::Internal {
                    *internal_port
                } else {
                    source.next(role)?
                };
                ports.insert(role, port);
            }
            hosts.push(HostPorts { host, ports });
        }
        Ok(Self {
            hosts,
            coordinators: internal.coordinators().iter().cloned().collect(),
        })
    }
}
