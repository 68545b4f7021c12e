// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Free-running per-role port generation over disjoint blocks.
// Author: Lukas Bower

use log::debug;

use crate::{PortError, PortRole};

/// Default first port of the client block.
pub const DEFAULT_BASE_PORT: u16 = 21000;
/// Default number of ports reserved for each role.
pub const DEFAULT_BLOCK_SIZE: u16 = 1000;

const PORT_LIMIT: u32 = u16::MAX as u32 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RoleCursor {
    next: u32,
    end: u32,
}

impl RoleCursor {
    fn starting_at(start: u32, block: u16) -> Self {
        Self {
            next: start,
            end: start.saturating_add(u32::from(block)).min(PORT_LIMIT),
        }
    }
}

/// Sequential port generator with one independent cursor per [`PortRole`].
///
/// Role `i` owns `[base + i * block, base + (i + 1) * block)`, so two roles
/// never hand out the same port and a cursor never revisits a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortGenerator {
    block: u16,
    cursors: [RoleCursor; 7],
}

impl PortGenerator {
    /// Create a generator whose first block starts at `base`.
    #[must_use]
    pub fn new(base: u16, block: u16) -> Self {
        let cursors = PortRole::ALL.map(|role| {
            let offset = u32::from(block) * role.ordinal() as u32;
            RoleCursor::starting_at(u32::from(base) + offset, block)
        });
        Self { block, cursors }
    }

    /// Reposition the cursor for `role` so its next port is `port`.
    ///
    /// The repositioned cursor keeps the configured block length. Moving a
    /// cursor into another role's block is the caller's responsibility.
    #[must_use]
    pub fn with_cursor(mut self, role: PortRole, port: u16) -> Self {
        self.cursors[role.ordinal()] = RoleCursor::starting_at(u32::from(port), self.block);
        self
    }

    /// Number of ports reserved per role.
    #[must_use]
    pub fn block(&self) -> u16 {
        self.block
    }

    /// Port the next call to [`PortGenerator::next`] would return for `role`.
    #[must_use]
    pub fn peek(&self, role: PortRole) -> Option<u16> {
        let cursor = self.cursors[role.ordinal()];
        if cursor.next < cursor.end {
            u16::try_from(cursor.next).ok()
        } else {
            None
        }
    }

    /// Issue a fresh port for `role` and advance its cursor.
    pub fn next(&mut self, role: PortRole) -> Result<u16, PortError> {
        let cursor = &mut self.cursors[role.ordinal()];
        if cursor.next >= cursor.end {
            return Err(PortError::Exhausted { role });
        }
        let port = u16::try_from(cursor.next).map_err(|_| PortError::Exhausted { role })?;
        cursor.next += 1;
        debug!("generated {role} port {port}");
        Ok(port)
    }
}

impl Default for PortGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT, DEFAULT_BLOCK_SIZE)
    }
}
