// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate local cluster harness policies.
// Author: Lukas Bower

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use localcluster_ports::{
    PortError, PortGenerator, PortOverrides, PortRole, PortSource, DEFAULT_BASE_PORT,
    DEFAULT_BLOCK_SIZE,
};
use serde::Deserialize;

use crate::tokens::TokenSet;
use crate::watch::{Backoff, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING};

/// Harness policy: ports, watch timing, tokens, helper listeners and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HarnessPolicy {
    /// Port allocation layout and overrides.
    pub ports: PortPolicy,
    /// Polling watcher timing.
    pub watch: WatchPolicy,
    /// Console tokens.
    pub tokens: TokenSet,
    /// Paired listener helper command and settle delays.
    pub listener: ListenerPolicy,
    /// Log file placement.
    pub logs: LogPolicy,
}

/// Port allocation layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PortPolicy {
    /// First port of the first role block.
    pub base: u16,
    /// Ports reserved per role.
    pub block: u16,
    /// Fixed ports per role; negative values mean "not overridden".
    pub overrides: BTreeMap<PortRole, i64>,
}

impl PortPolicy {
    /// Build a port source for this layout.
    ///
    /// Overrides are enabled when the table has any entry.
    pub fn port_source(&self) -> Result<PortSource, PortError> {
        let mut overrides = PortOverrides::new();
        if !self.overrides.is_empty() {
            overrides.enable();
        }
        for (role, value) in &self.overrides {
            overrides.set_raw(*role, *value)?;
        }
        Ok(PortSource::with_overrides(
            PortGenerator::new(self.base, self.block),
            overrides,
        ))
    }
}

impl Default for PortPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_PORT,
            block: DEFAULT_BLOCK_SIZE,
            overrides: BTreeMap::new(),
        }
    }
}

/// Backoff bounds for polling watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WatchPolicy {
    /// First polling delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Largest polling delay in milliseconds.
    pub backoff_ceiling_ms: u64,
}

impl WatchPolicy {
    /// Backoff described by this policy.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_ceiling_ms),
        )
    }
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_ceiling_ms: DEFAULT_BACKOFF_CEILING.as_millis() as u64,
        }
    }
}

/// Helper listener command used to occupy a port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ListenerPolicy {
    /// Program to spawn.
    pub program: String,
    /// Arguments; `{addr}` and `{port}` are substituted.
    pub args: Vec<String>,
    /// Delay after starting both helpers, in milliseconds.
    pub start_settle_ms: u64,
    /// Delay after stopping both helpers, in milliseconds.
    pub stop_settle_ms: u64,
}

impl Default for ListenerPolicy {
    fn default() -> Self {
        Self {
            program: "nc".to_owned(),
            args: vec!["-l".to_owned(), "{addr}".to_owned(), "{port}".to_owned()],
            start_settle_ms: 2000,
            stop_settle_ms: 100,
        }
    }
}

/// Where per-process logs are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogPolicy {
    /// Directory receiving `<name>-<host>.txt` files.
    pub dir: PathBuf,
    /// Append to existing logs instead of truncating them.
    pub append: bool,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("testoutput"),
            append: false,
        }
    }
}

/// Optional overrides layered on top of a loaded policy.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PolicyOverrides {
    /// Override the first port of the first role block.
    pub base_port: Option<u16>,
    /// Override the per-role block size.
    pub block: Option<u16>,
    /// Override the first polling delay.
    pub backoff_base_ms: Option<u64>,
    /// Override the polling delay ceiling.
    pub backoff_ceiling_ms: Option<u64>,
    /// Override the log directory.
    pub log_dir: Option<PathBuf>,
    /// Override append mode for logs.
    pub append_logs: Option<bool>,
}

impl HarnessPolicy {
    /// Apply overrides and return the validated result.
    pub fn with_overrides(self, overrides: &PolicyOverrides) -> Result<Self> {
        let mut updated = self;
        if let Some(value) = overrides.base_port {
            updated.ports.base = value;
        }
        if let Some(value) = overrides.block {
            updated.ports.block = value;
        }
        if let Some(value) = overrides.backoff_base_ms {
            updated.watch.backoff_base_ms = value;
        }
        if let Some(value) = overrides.backoff_ceiling_ms {
            updated.watch.backoff_ceiling_ms = value;
        }
        if let Some(value) = &overrides.log_dir {
            updated.logs.dir = value.clone();
        }
        if let Some(value) = overrides.append_logs {
            updated.logs.append = value;
        }
        validate_policy(&updated)?;
        Ok(updated)
    }
}

/// Load and validate a harness policy from a TOML file.
pub fn load_policy(path: &Path) -> Result<HarnessPolicy> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read harness policy {}", path.display()))?;
    let policy: HarnessPolicy = toml::from_str(&text)
        .with_context(|| format!("invalid harness policy TOML in {}", path.display()))?;
    validate_policy(&policy)?;
    Ok(policy)
}

fn validate_policy(policy: &HarnessPolicy) -> Result<()> {
    if policy.ports.base == 0 {
        return Err(anyhow!("ports base must be >= 1"));
    }
    if policy.ports.block == 0 {
        return Err(anyhow!("ports block must be >= 1"));
    }
    for (role, value) in &policy.ports.overrides {
        if *value > i64::from(u16::MAX) {
            return Err(anyhow!("ports override for {role} out of range: {value}"));
        }
    }
    if policy.watch.backoff_base_ms == 0 {
        return Err(anyhow!("watch backoff_base_ms must be >= 1"));
    }
    if policy.watch.backoff_ceiling_ms < policy.watch.backoff_base_ms {
        return Err(anyhow!(
            "watch backoff_ceiling_ms {} must be >= backoff_base_ms {}",
            policy.watch.backoff_ceiling_ms,
            policy.watch.backoff_base_ms
        ));
    }
    if let Some(name) = policy.tokens.first_empty() {
        return Err(anyhow!("tokens {name} must not be empty"));
    }
    if policy.listener.program.trim().is_empty() {
        return Err(anyhow!("listener program must not be empty"));
    }
    if !policy.listener.args.iter().any(|arg| arg.contains("{port}")) {
        return Err(anyhow!("listener args must mention {{port}}"));
    }
    Ok(())
}
