// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the local cluster harness library surface.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Harness pieces used by local multi-process cluster tests.
//!
//! An orchestrator asks [`localcluster_ports::PortSource`] for ports, spawns
//! server processes, wraps each process's output in an [`OutputPipe`] and then
//! waits on the pipe (or an attached watcher) for readiness tokens while the
//! pipe's reader thread tees output into a log file.

/// Harness setup context.
pub mod context;
/// Per-host pipe bookkeeping.
pub mod group;
/// Helper listeners that occupy a port.
pub mod listener;
/// Process output pipes.
pub mod pipe;
/// Harness policy loading and validation.
pub mod policy;
/// Console tokens recognised in server output.
pub mod tokens;
/// Line watchers.
pub mod watch;

use std::io;

use thiserror::Error;

pub use context::HarnessContext;
pub use group::PipeGroup;
pub use listener::PairedListener;
pub use localcluster_ports::{InternalPortSet, PortError, PortRole, PortSource};
pub use pipe::{parse_host_id, InitMark, OutputPipe, PipeConfig, ProcessHandle};
pub use policy::{load_policy, HarnessPolicy, PolicyOverrides};
pub use tokens::{ReadyKind, TokenSet};
pub use watch::{
    tail_file_for, Backoff, BlockingWatcher, LineWatcher, PollingWatcher, WatchToken,
};

/// Errors surfaced by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A host-id announcement did not carry a numeric id. Fatal to the pipe.
    #[error("malformed host id announcement: '{line}'")]
    MalformedHostId {
        /// Offending output line.
        line: String,
    },
    /// Filesystem or process failure outside the output stream itself.
    #[error("{context}: {source}")]
    Io {
        /// What the harness was doing.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A spawned child had no piped stdout to read.
    #[error("child process {pid} has no piped stdout")]
    MissingStdout {
        /// Process id of the child.
        pid: u32,
    },
    /// Port allocation failed.
    #[error(transparent)]
    Ports(#[from] PortError),
}

impl HarnessError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
