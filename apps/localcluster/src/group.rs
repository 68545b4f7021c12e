// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track one output pipe per host index across start, kill and rejoin.
// Author: Lukas Bower

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::pipe::OutputPipe;
use crate::HarnessError;

/// Pipes indexed by host slot. Slots stay put when a host is removed.
#[derive(Debug, Default)]
pub struct PipeGroup {
    slots: Vec<Option<OutputPipe>>,
}

impl PipeGroup {
    /// Empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, occupied or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a pipe and return its slot index.
    pub fn insert(&mut self, pipe: OutputPipe) -> usize {
        self.slots.push(Some(pipe));
        self.slots.len() - 1
    }

    /// Put `pipe` in slot `index`, returning the previous occupant.
    ///
    /// Used on rejoin; the group grows when `index` is past the end.
    pub fn replace(&mut self, index: usize, pipe: OutputPipe) -> Option<OutputPipe> {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        let previous = self.slots[index].replace(pipe);
        if previous.is_some() {
            info!("host {index}: pipe replaced");
        }
        previous
    }

    /// Empty slot `index` and return its pipe.
    pub fn remove(&mut self, index: usize) -> Option<OutputPipe> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Pipe in slot `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&OutputPipe> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots with their indexes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &OutputPipe)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|pipe| (index, pipe)))
    }

    /// Wait until every pipe is ready, sharing one deadline.
    ///
    /// Returns `Ok(false)` as soon as a pipe times out or closes unready.
    pub fn await_all_ready(&self, timeout: Duration) -> Result<bool, HarnessError> {
        let deadline = Instant::now() + timeout;
        for (index, pipe) in self.iter() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !pipe.wait_ready(remaining)? {
                warn!("host {index}: {} not ready", pipe.label());
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Slot whose process announced the smallest host id.
    #[must_use]
    pub fn lowest_host_id_index(&self) -> Option<usize> {
        self.iter()
            .filter_map(|(index, pipe)| pipe.host_id().map(|id| (id, index)))
            .min()
            .map(|(_, index)| index)
    }

    /// True when no attached process is still running.
    #[must_use]
    pub fn all_exited(&self) -> bool {
        self.iter()
            .filter_map(|(_, pipe)| pipe.process())
            .all(|process| !process.is_alive())
    }

    /// Kill every attached process that is still alive and reap it.
    ///
    /// Returns the number of processes killed.
    pub fn kill_all(&self) -> usize {
        let mut killed = 0;
        for (index, pipe) in self.iter() {
            let Some(process) = pipe.process() else {
                continue;
            };
            if !process.is_alive() {
                continue;
            }
            match process.kill() {
                Ok(()) => {
                    killed += 1;
                    if let Err(err) = process.wait() {
                        warn!("host {index}: failed to reap pid {}: {err}", process.pid());
                    }
                }
                Err(err) => warn!("host {index}: failed to kill pid {}: {err}", process.pid()),
            }
        }
        killed
    }
}
