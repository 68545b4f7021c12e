// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Console tokens recognised in server output.
// Author: Lukas Bower

use serde::Deserialize;

/// Printed once a server has finished startup and accepts work.
pub const SERVER_READY_TOKEN: &str = "Server completed initialization";
/// Printed when initialisation completes; used only to time startup.
pub const INIT_COMPLETE_TOKEN: &str = "Server completed init";
/// Printed when a killed host has rejoined the cluster.
pub const REJOIN_COMPLETE_TOKEN: &str = "Node recovery complete";
/// Printed when a new host has joined a running cluster.
pub const JOIN_COMPLETE_TOKEN: &str = "Node join completed";
/// Prefix of the line announcing the host id, e.g. `INITIALIZING INITIATOR ID: 1, SITEID: 7:0`.
pub const HOST_ID_TOKEN: &str = "INITIALIZING INITIATOR ID:";

/// Which readiness condition a pipe gates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyKind {
    /// Initial cluster startup.
    Startup,
    /// A killed host coming back.
    Rejoin,
    /// A new host joining a running cluster.
    Join,
}

/// Token strings in use for one harness.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TokenSet {
    /// Startup readiness token.
    pub ready: String,
    /// Initialisation timing marker.
    pub init: String,
    /// Rejoin readiness token.
    pub rejoin: String,
    /// Join readiness token.
    pub join: String,
    /// Host-id announcement prefix.
    pub host_id: String,
}

impl TokenSet {
    /// Token that signals readiness for `kind`.
    #[must_use]
    pub fn ready_token(&self, kind: ReadyKind) -> &str {
        match kind {
            ReadyKind::Startup => &self.ready,
            ReadyKind::Rejoin => &self.rejoin,
            ReadyKind::Join => &self.join,
        }
    }

    pub(crate) fn first_empty(&self) -> Option<&'static str> {
        [
            ("ready", &self.ready),
            ("init", &self.init),
            ("rejoin", &self.rejoin),
            ("join", &self.join),
            ("host_id", &self.host_id),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

impl Default for TokenSet {
    fn default() -> Self {
        Self {
            ready: SERVER_READY_TOKEN.to_owned(),
            init: INIT_COMPLETE_TOKEN.to_owned(),
            rejoin: REJOIN_COMPLETE_TOKEN.to_owned(),
            join: JOIN_COMPLETE_TOKEN.to_owned(),
            host_id: HOST_ID_TOKEN.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_token_follows_kind() {
        let tokens = TokenSet::default();
        assert_eq!(tokens.ready_token(ReadyKind::Startup), SERVER_READY_TOKEN);
        assert_eq!(tokens.ready_token(ReadyKind::Rejoin), REJOIN_COMPLETE_TOKEN);
        assert_eq!(tokens.ready_token(ReadyKind::Join), JOIN_COMPLETE_TOKEN);
    }

    #[test]
    fn reports_first_blank_token() {
        let mut tokens = TokenSet::default();
        assert_eq!(tokens.first_empty(), None);
        tokens.join = "  ".to_owned();
        assert_eq!(tokens.first_empty(), Some("join"));
    }
}
