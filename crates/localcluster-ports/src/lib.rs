// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Defines the localcluster-ports library and public module surface.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Port allocation for local multi-host clusters.
//!
//! Every simulated host in a local cluster needs its own client, admin,
//! internal-mesh and auxiliary ports. [`PortSource`] hands those out from
//! disjoint per-role blocks, or answers with a fixed value when a
//! [`PortOverrides`] entry is enabled. [`InternalPortSet`] reserves the
//! internal-mesh ports for a whole cluster up front and derives the
//! coordinator fragments used in bootstrap strings.

mod generator;
mod internal;
mod overrides;
mod plan;
mod role;
mod source;

use thiserror::Error;

pub use generator::{PortGenerator, DEFAULT_BASE_PORT, DEFAULT_BLOCK_SIZE};
pub use internal::InternalPortSet;
pub use overrides::PortOverrides;
pub use plan::{HostPorts, PortPlan};
pub use role::PortRole;
pub use source::PortSource;

/// Errors surfaced by port allocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    /// A caller-supplied count or index violated its precondition.
    #[error("invalid {what}: {value}")]
    InvalidArgument {
        /// Name of the rejected argument.
        what: &'static str,
        /// Value that was supplied.
        value: i64,
    },
    /// The block reserved for a role has no ports left.
    #[error("port block for role {role} is exhausted")]
    Exhausted {
        /// Role whose block ran out.
        role: PortRole,
    },
    /// A role name did not match any known role.
    #[error("unknown port role '{0}'")]
    UnknownRole(String),
}

impl PortError {
    pub(crate) fn invalid(what: &'static str, value: impl Into<i64>) -> Self {
        Self::InvalidArgument {
            what,
            value: value.into(),
        }
    }
}
