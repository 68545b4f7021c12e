// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Name the logical port roles a cluster host requires.
// Author: Lukas Bower

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PortError;

/// Logical purpose of a port. Each role is allocated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    /// Client-facing wire protocol port.
    Client,
    /// Administrative client port.
    Admin,
    /// Internal mesh port used between hosts.
    Internal,
    /// Coordination service port.
    Zookeeper,
    /// Replication stream port.
    Replication,
    /// Management (JMX) port.
    Jmx,
    /// HTTP interface port.
    Http,
}

impl PortRole {
    /// All roles in block order.
    pub const ALL: [PortRole; 7] = [
        PortRole::Client,
        PortRole::Admin,
        PortRole::Internal,
        PortRole::Zookeeper,
        PortRole::Replication,
        PortRole::Jmx,
        PortRole::Http,
    ];

    /// Position of the role's block within the generator layout.
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            PortRole::Client => 0,
            PortRole::Admin => 1,
            PortRole::Internal => 2,
            PortRole::Zookeeper => 3,
            PortRole::Replication => 4,
            PortRole::Jmx => 5,
            PortRole::Http => 6,
        }
    }

    /// Lowercase label used in policy files and command output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            PortRole::Client => "client",
            PortRole::Admin => "admin",
            PortRole::Internal => "internal",
            PortRole::Zookeeper => "zookeeper",
            PortRole::Replication => "replication",
            PortRole::Jmx => "jmx",
            PortRole::Http => "http",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PortRole {
    type Err = PortError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        PortRole::ALL
            .into_iter()
            .find(|role| role.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| PortError::UnknownRole(trimmed.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_block_order() {
        for (idx, role) in PortRole::ALL.iter().enumerate() {
            assert_eq!(role.ordinal(), idx);
        }
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("JMX".parse::<PortRole>().unwrap(), PortRole::Jmx);
        assert_eq!(" internal ".parse::<PortRole>().unwrap(), PortRole::Internal);
        assert_eq!(
            "gossip".parse::<PortRole>().unwrap_err(),
            PortError::UnknownRole("gossip".to_owned())
        );
    }
}
