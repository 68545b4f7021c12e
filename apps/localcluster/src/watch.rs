// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Line watchers that wait for a token to appear in process output.
// Author: Lukas Bower

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::HarnessError;

/// Default first delay of a polling watcher.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);
/// Default upper bound on a polling watcher's delay.
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_millis(500);

/// Receives every line a pipe reads.
pub trait LineWatcher: Send + Sync {
    /// Inspect one line of output, without its terminator.
    fn handle_line(&self, line: &str);

    /// Called once when the watched stream reaches end of input.
    fn stream_closed(&self) {}
}

/// Substring and time budget a watcher is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchToken {
    needle: String,
    timeout: Duration,
}

impl WatchToken {
    /// Watch for `needle` for at most `timeout`.
    pub fn new(needle: impl Into<String>, timeout: Duration) -> Self {
        Self {
            needle: needle.into(),
            timeout,
        }
    }

    /// Substring being searched for.
    #[must_use]
    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// Time budget for the wait.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Case-sensitive containment check.
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.needle.as_str())
    }
}

#[derive(Debug, Default)]
struct Gate {
    matched: bool,
    released: bool,
    interrupts: u64,
}

/// Watcher whose waiters block until the first match.
///
/// The gate opens once, on a match or when the stream closes; every waiter,
/// current and future, returns immediately after that. An interrupt only
/// releases the waiters blocked at that moment.
#[derive(Debug)]
pub struct BlockingWatcher {
    token: WatchToken,
    gate: Mutex<Gate>,
    signal: Condvar,
}

impl BlockingWatcher {
    /// Create a watcher for `token`.
    #[must_use]
    pub fn new(token: WatchToken) -> Self {
        Self {
            token,
            gate: Mutex::new(Gate::default()),
            signal: Condvar::new(),
        }
    }

    /// Token being watched.
    #[must_use]
    pub fn token(&self) -> &WatchToken {
        &self.token
    }

    /// Report whether a matching line has been seen.
    #[must_use]
    pub fn is_matched(&self) -> bool {
        self.gate.lock().expect("watch gate lock poisoned").matched
    }

    /// Block until a match, the stream closing, an interrupt or the timeout.
    ///
    /// Returns `true` only when a matching line was seen.
    pub fn await_match(&self) -> bool {
        let gate = self.gate.lock().expect("watch gate lock poisoned");
        let entered = gate.interrupts;
        let (gate, _) = self
            .signal
            .wait_timeout_while(gate, self.token.timeout, |gate| {
                !gate.released && gate.interrupts == entered
            })
            .expect("watch gate lock poisoned");
        gate.matched
    }

    /// Wake the waiters currently blocked; they return `false` unless a match
    /// already happened. Later waiters are unaffected.
    pub fn interrupt(&self) {
        let mut gate = self.gate.lock().expect("watch gate lock poisoned");
        gate.interrupts = gate.interrupts.wrapping_add(1);
        self.signal.notify_all();
    }

    fn release(&self, matched: bool) {
        let mut gate = self.gate.lock().expect("watch gate lock poisoned");
        if gate.matched {
            return;
        }
        gate.matched = matched;
        gate.released = true;
        self.signal.notify_all();
    }
}

impl LineWatcher for BlockingWatcher {
    fn handle_line(&self, line: &str) {
        if self.token.matches(line) {
            self.release(true);
        }
    }

    fn stream_closed(&self) {
        self.release(false);
    }
}

/// Doubling delay with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    /// Start at `base` and never exceed `ceiling`.
    #[must_use]
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            current: base,
        }
    }

    /// Return the delay to sleep now and double the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Go back to the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING)
    }
}

/// Watcher checked from a polling loop instead of blocking on a monitor.
#[derive(Debug)]
pub struct PollingWatcher {
    token: WatchToken,
    started: Instant,
    found: AtomicBool,
    closed: AtomicBool,
    backoff: Mutex<Backoff>,
}

impl PollingWatcher {
    /// Create a watcher for `token` with the default backoff.
    #[must_use]
    pub fn new(token: WatchToken) -> Self {
        Self::with_backoff(token, Backoff::default())
    }

    /// Create a watcher for `token` with an explicit backoff.
    #[must_use]
    pub fn with_backoff(token: WatchToken, backoff: Backoff) -> Self {
        Self {
            token,
            started: Instant::now(),
            found: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            backoff: Mutex::new(backoff),
        }
    }

    /// Token being watched.
    #[must_use]
    pub fn token(&self) -> &WatchToken {
        &self.token
    }

    /// Report whether a matching line has been seen.
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// True once the token was found, the stream closed, or the timeout elapsed.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.is_found()
            || self.closed.load(Ordering::Acquire)
            || self.started.elapsed() >= self.token.timeout
    }

    /// Sleep for the next backoff delay, clipped to the remaining budget.
    pub fn sleep_step(&self) {
        let delay = self
            .backoff
            .lock()
            .expect("watch backoff lock poisoned")
            .next_delay();
        let remaining = self.token.timeout.saturating_sub(self.started.elapsed());
        thread::sleep(delay.min(remaining));
    }

    /// Poll until satisfied; returns whether the token was actually found.
    pub fn await_eventually(&self) -> bool {
        while !self.is_satisfied() {
            self.sleep_step();
        }
        self.is_found()
    }
}

impl LineWatcher for PollingWatcher {
    fn handle_line(&self, line: &str) {
        if !self.is_found() && self.token.matches(line) {
            self.found.store(true, Ordering::Release);
        }
    }

    fn stream_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Poll a log file that another thread appends to until `token` shows up.
///
/// Only complete lines are inspected. A file that does not exist yet is
/// retried until the timeout.
pub fn tail_file_for(path: &Path, token: WatchToken, backoff: Backoff) -> Result<bool, HarnessError> {
    let watcher = PollingWatcher::with_backoff(token, backoff);
    let mut reader: Option<BufReader<File>> = None;
    let mut pending = String::new();
    loop {
        if reader.is_none() {
            match File::open(path) {
                Ok(file) => reader = Some(BufReader::new(file)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(HarnessError::io(format!("open {}", path.display()), err)),
            }
        }
        if let Some(reader) = reader.as_mut() {
            loop {
                let read = reader
                    .read_line(&mut pending)
                    .map_err(|err| HarnessError::io(format!("read {}", path.display()), err))?;
                if read == 0 {
                    break;
                }
                if pending.ends_with('\n') {
                    watcher.handle_line(pending.trim_end_matches(['\r', '\n']));
                    pending.clear();
                }
            }
        }
        if watcher.is_satisfied() {
            return Ok(watcher.is_found());
        }
        watcher.sleep_step();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(30));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
    }

    #[test]
    fn ceiling_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_millis(40), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
    }

    #[test]
    fn blocking_watcher_ignores_later_matches() {
        let watcher = BlockingWatcher::new(WatchToken::new("ready", Duration::from_secs(1)));
        watcher.handle_line("not yet");
        assert!(!watcher.is_matched());
        watcher.handle_line("server ready");
        watcher.handle_line("ready again");
        assert!(watcher.is_matched());
        assert!(watcher.await_match());
        assert!(watcher.await_match());
    }

    #[test]
    fn blocking_watcher_times_out_without_match() {
        let watcher = BlockingWatcher::new(WatchToken::new("ready", Duration::from_millis(50)));
        watcher.handle_line("booting");
        let started = Instant::now();
        assert!(!watcher.await_match());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn interrupt_releases_waiter_without_match() {
        let watcher = Arc::new(BlockingWatcher::new(WatchToken::new(
            "ready",
            Duration::from_secs(10),
        )));
        let waiter = {
            let watcher = Arc::clone(&watcher);
            thread::spawn(move || watcher.await_match())
        };
        thread::sleep(Duration::from_millis(20));
        watcher.interrupt();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn interrupt_does_not_close_gate_for_later_waiters() {
        let watcher = Arc::new(BlockingWatcher::new(WatchToken::new(
            "ready",
            Duration::from_secs(5),
        )));
        watcher.interrupt();
        let feeder = {
            let watcher = Arc::clone(&watcher);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                watcher.handle_line("server ready");
            })
        };
        let started = Instant::now();
        assert!(watcher.await_match());
        assert!(started.elapsed() >= Duration::from_millis(50));
        feeder.join().unwrap();
    }

    #[test]
    fn token_match_is_case_sensitive() {
        let token = WatchToken::new("Ready", Duration::from_secs(1));
        assert!(token.matches("Server Ready now"));
        assert!(!token.matches("server ready now"));
    }

    #[test]
    fn polling_watcher_reports_timeout_as_not_found() {
        let watcher = PollingWatcher::with_backoff(
            WatchToken::new("ready", Duration::from_millis(30)),
            Backoff::new(Duration::from_millis(1), Duration::from_millis(4)),
        );
        assert!(!watcher.is_satisfied());
        assert!(!watcher.await_eventually());
        assert!(watcher.is_satisfied());
    }

    #[test]
    fn polling_watcher_closed_stream_is_satisfied() {
        let watcher = PollingWatcher::new(WatchToken::new("ready", Duration::from_secs(30)));
        watcher.stream_closed();
        assert!(watcher.is_satisfied());
        assert!(!watcher.await_eventually());
    }
}
