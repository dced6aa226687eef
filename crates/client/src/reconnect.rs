// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect bookkeeping, independent of any transport.

use std::time::Duration;

/// What to do after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`; this will be attempt number `attempt`.
    Schedule { attempt: u32, delay: Duration },
    /// Every allowed attempt has been used.
    Exhausted,
    /// Auto-reconnect is off.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    enabled: bool,
    delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, delay: Duration, max_attempts: u32) -> Self {
        Self { enabled, delay, max_attempts, attempts: 0 }
    }

    /// Record an unexpected close (including a failed reconnect attempt).
    pub fn on_unexpected_close(&mut self) -> ReconnectDecision {
        if !self.enabled {
            return ReconnectDecision::Disabled;
        }
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted;
        }
        self.attempts += 1;
        ReconnectDecision::Schedule { attempt: self.attempts, delay: self.delay }
    }

    /// A handshake succeeded.
    pub fn on_authenticated(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;
