// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Own the policy, port source and log directory for one harness run.
// Author: Lukas Bower

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use log::info;

use crate::listener::PairedListener;
use crate::pipe::{OutputPipe, PipeConfig};
use crate::policy::HarnessPolicy;
use crate::tokens::ReadyKind;
use crate::watch::LineWatcher;
use crate::{HarnessError, PortSource};

/// Per-run harness state shared by every process an orchestrator launches.
#[derive(Debug)]
pub struct HarnessContext {
    policy: HarnessPolicy,
    ports: PortSource,
    prepared: Mutex<bool>,
}

impl HarnessContext {
    /// Build a context; port overrides in the policy are applied here.
    pub fn new(policy: HarnessPolicy) -> Result<Self, HarnessError> {
        let ports = policy.ports.port_source()?;
        Ok(Self {
            policy,
            ports,
            prepared: Mutex::new(false),
        })
    }

    /// Policy in effect.
    #[must_use]
    pub fn policy(&self) -> &HarnessPolicy {
        &self.policy
    }

    /// Port source shared by everything launched from this context.
    #[must_use]
    pub fn port_source(&self) -> &PortSource {
        &self.ports
    }

    /// Create the log directory. The first call also removes stale `*.txt` logs.
    ///
    /// Returns the number of files removed.
    pub fn prepare_log_dir(&self) -> Result<usize, HarnessError> {
        let dir = &self.policy.logs.dir;
        let mut prepared = self.prepared.lock().expect("log dir lock poisoned");
        fs::create_dir_all(dir)
            .map_err(|err| HarnessError::io(format!("create {}", dir.display()), err))?;
        if *prepared {
            return Ok(0);
        }
        let removed = remove_stale_logs(dir)
            .map_err(|err| HarnessError::io(format!("clean {}", dir.display()), err))?;
        *prepared = true;
        if removed > 0 {
            info!("removed {removed} stale logs from {}", dir.display());
        }
        Ok(removed)
    }

    /// `<dir>/<name>-<host>.txt`.
    #[must_use]
    pub fn log_path(&self, name: &str, host: usize) -> PathBuf {
        self.policy.logs.dir.join(format!("{name}-{host}.txt"))
    }

    /// Pipe configuration for host `host` of process family `name`.
    #[must_use]
    pub fn pipe_config(&self, name: &str, host: usize, kind: ReadyKind) -> PipeConfig {
        PipeConfig::new(
            format!("{name}-{host}"),
            self.log_path(name, host),
            &self.policy.tokens,
            kind,
        )
        .append(self.policy.logs.append)
    }

    /// Spawn `command` and tee its combined stdout and stderr into the host's log.
    pub fn launch(
        &self,
        command: Command,
        name: &str,
        host: usize,
        kind: ReadyKind,
        watcher: Option<Arc<dyn LineWatcher>>,
    ) -> Result<OutputPipe, HarnessError> {
        self.prepare_log_dir()?;
        let mut config = self.pipe_config(name, host, kind);
        if let Some(watcher) = watcher {
            config = config.with_watcher(watcher);
        }
        OutputPipe::launch(command, config)
    }

    /// Start a paired listener on `port` using the policy's helper command.
    pub fn listen(&self, port: u16, loopback_only: bool) -> Result<PairedListener, HarnessError> {
        PairedListener::start(port, loopback_only, &self.policy.listener)
    }
}

fn remove_stale_logs(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
