// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Occupy a port on IPv4 and IPv6 with helper listener processes.
// Author: Lukas Bower

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::policy::ListenerPolicy;
use crate::HarnessError;

/// Two helper processes listening on the same port, one per address family.
///
/// Used to provoke bind conflicts in the servers under test.
#[derive(Debug)]
pub struct PairedListener {
    policy: ListenerPolicy,
    port: u16,
    helpers: Vec<Child>,
}

impl PairedListener {
    /// Spawn both helpers on `port` and wait for the start settle delay.
    ///
    /// With `loopback_only` the helpers bind `127.0.0.1` and `::1`, otherwise
    /// the wildcard addresses.
    pub fn start(
        port: u16,
        loopback_only: bool,
        policy: &ListenerPolicy,
    ) -> Result<Self, HarnessError> {
        let addrs = if loopback_only {
            ["127.0.0.1", "::1"]
        } else {
            ["0.0.0.0", "::"]
        };
        let mut listener = Self {
            policy: policy.clone(),
            port,
            helpers: Vec::with_capacity(addrs.len()),
        };
        for addr in addrs {
            let child = listener.spawn_helper(addr)?;
            info!("listener: helper {} holding {addr} port {port}", child.id());
            listener.helpers.push(child);
        }
        thread::sleep(Duration::from_millis(policy.start_settle_ms));
        Ok(listener)
    }

    /// Port the helpers were asked to occupy.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of helpers still owned by this listener.
    #[must_use]
    pub fn helper_count(&self) -> usize {
        self.helpers.len()
    }

    /// Kill both helpers and wait for the stop settle delay.
    ///
    /// Returns `0` when every kill succeeded, `1` otherwise.
    pub fn stop(&mut self) -> i32 {
        let status = self.kill_helpers();
        thread::sleep(Duration::from_millis(self.policy.stop_settle_ms));
        status
    }

    fn spawn_helper(&self, addr: &str) -> Result<Child, HarnessError> {
        let port = self.port.to_string();
        let args: Vec<String> = self
            .policy
            .args
            .iter()
            .map(|arg| arg.replace("{addr}", addr).replace("{port}", &port))
            .collect();
        Command::new(&self.policy.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| {
                HarnessError::io(
                    format!("spawn listener '{}' on {addr}:{port}", self.policy.program),
                    err,
                )
            })
    }

    fn kill_helpers(&mut self) -> i32 {
        let mut status = 0;
        for mut child in self.helpers.drain(..) {
            if let Err(err) = child.kill() {
                warn!("listener: failed to kill helper {}: {err}", child.id());
                status = 1;
            }
            if let Err(err) = child.wait() {
                warn!("listener: failed to reap helper {}: {err}", child.id());
            }
        }
        status
    }
}

impl Drop for PairedListener {
    fn drop(&mut self) {
        if !self.helpers.is_empty() {
            self.kill_helpers();
        }
    }
}
