// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drain a child's console output into a log file while watching for tokens.
// Author: Lukas Bower

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::tokens::{ReadyKind, TokenSet};
use crate::watch::LineWatcher;
use crate::HarnessError;

/// Extract the host id from an announcement line.
///
/// The last whitespace-delimited field carries the id, optionally followed by
/// `:` and a suffix (`... SITEID: 7:0` yields `7`).
#[must_use]
pub fn parse_host_id(line: &str) -> Option<i32> {
    let last = line.split_whitespace().last()?;
    let digits = last.split(':').next().unwrap_or(last);
    digits.parse().ok()
}

/// Shared handle to the child process whose output a pipe drains.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    child: Arc<Mutex<Child>>,
}

impl ProcessHandle {
    /// Wrap a spawned child.
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True while the process has not exited.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Exit status if the process has already exited.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().expect("child lock poisoned").try_wait()
    }

    /// Kill the process.
    pub fn kill(&self) -> io::Result<()> {
        self.child.lock().expect("child lock poisoned").kill()
    }

    /// Block until the process exits.
    pub fn wait(&self) -> io::Result<ExitStatus> {
        self.child.lock().expect("child lock poisoned").wait()
    }
}

/// Moment the initialisation marker first appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitMark {
    /// Wall-clock time the marker line was read.
    pub at: DateTime<Utc>,
    /// Time between pipe start and the marker.
    pub since_start: Duration,
}

/// Construction parameters for an [`OutputPipe`].
#[derive(Clone)]
pub struct PipeConfig {
    /// Short name used for the reader thread and log lines.
    pub label: String,
    /// File receiving every output line.
    pub log_path: PathBuf,
    /// Extend an existing log instead of truncating it.
    pub append: bool,
    /// Token that marks the process ready.
    pub ready_token: String,
    /// Token whose first appearance is timestamped.
    pub init_token: String,
    /// Prefix of the host-id announcement.
    pub host_id_token: String,
    /// Optional watcher fed every line.
    pub watcher: Option<Arc<dyn LineWatcher>>,
}

impl PipeConfig {
    /// Configure a pipe gating on the `kind` token from `tokens`.
    pub fn new(
        label: impl Into<String>,
        log_path: impl Into<PathBuf>,
        tokens: &TokenSet,
        kind: ReadyKind,
    ) -> Self {
        Self {
            label: label.into(),
            log_path: log_path.into(),
            append: false,
            ready_token: tokens.ready_token(kind).to_owned(),
            init_token: tokens.init.clone(),
            host_id_token: tokens.host_id.clone(),
            watcher: None,
        }
    }

    /// Choose append (`true`) or truncate (`false`) for the log file.
    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// Feed every line to `watcher` as well.
    #[must_use]
    pub fn with_watcher(mut self, watcher: Arc<dyn LineWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }
}

impl fmt::Debug for PipeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeConfig")
            .field("label", &self.label)
            .field("log_path", &self.log_path)
            .field("append", &self.append)
            .field("ready_token", &self.ready_token)
            .field("init_token", &self.init_token)
            .field("host_id_token", &self.host_id_token)
            .field("watcher", &self.watcher.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
struct PipeState {
    host_id: Option<i32>,
    ready: bool,
    eof: bool,
    init: Option<InitMark>,
    ready_after: Option<Duration>,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct PipeShared {
    state: Mutex<PipeState>,
    signal: Condvar,
}

impl PipeShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PipeState> {
        self.state.lock().expect("pipe state lock poisoned")
    }
}

/// Tees one process's output into a log file on a dedicated reader thread.
///
/// The reader moves from running to EOF when the stream ends or fails; read
/// failures are not reported. A malformed host-id announcement stops the
/// reader and is returned to waiters as [`HarnessError::MalformedHostId`].
pub struct OutputPipe {
    label: String,
    log_path: PathBuf,
    ready_token: String,
    shared: Arc<PipeShared>,
    process: Option<ProcessHandle>,
    reader: Mutex<Option<JoinHandle<Result<(), HarnessError>>>>,
}

impl OutputPipe {
    /// Start draining `stream`.
    pub fn start<R>(stream: R, config: PipeConfig) -> Result<Self, HarnessError>
    where
        R: Read + Send + 'static,
    {
        Self::start_reader(stream, config, None)
    }

    /// Take `child`'s stdout and start draining it.
    ///
    /// The child must have been spawned with `Stdio::piped()` stdout. Only stdout
    /// is drained; use [`OutputPipe::launch`] for stdout and stderr together.
    pub fn attach(mut child: Child, config: PipeConfig) -> Result<Self, HarnessError> {
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or(HarnessError::MissingStdout { pid })?;
        Self::start_reader(stdout, config, Some(ProcessHandle::new(child)))
    }

    /// Spawn `command` with stdout and stderr joined into one stream and drain it.
    ///
    /// Stdin is closed; the command's own stdout and stderr settings are replaced.
    pub fn launch(mut command: Command, config: PipeConfig) -> Result<Self, HarnessError> {
        let (stream, writer) =
            io::pipe().map_err(|err| HarnessError::io("create output pipe", err))?;
        let stderr = writer
            .try_clone()
            .map_err(|err| HarnessError::io("clone output pipe", err))?;
        let child = command
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr)
            .spawn()
            .map_err(|err| HarnessError::io(format!("spawn {}", config.label), err))?;
        // The command still owns both write ends; EOF needs the child to be the last writer.
        drop(command);
        debug!("{}: spawned pid {}", config.label, child.id());
        Self::start_reader(stream, config, Some(ProcessHandle::new(child)))
    }

    fn start_reader<R>(
        stream: R,
        config: PipeConfig,
        process: Option<ProcessHandle>,
    ) -> Result<Self, HarnessError>
    where
        R: Read + Send + 'static,
    {
        let writer = open_log(&config.log_path, config.append)?;
        let shared = Arc::new(PipeShared::default());
        let reader = PipeReader {
            label: config.label.clone(),
            input: BufReader::new(stream),
            writer,
            shared: Arc::clone(&shared),
            ready_token: config.ready_token.clone(),
            init_token: config.init_token,
            host_id_token: config.host_id_token,
            watcher: config.watcher,
            started: Instant::now(),
            ready_seen: false,
            init_seen: false,
        };
        let handle = thread::Builder::new()
            .name(format!("cluster-pipe:{}", config.label))
            .spawn(move || reader.run())
            .map_err(|err| HarnessError::io("spawn pipe reader", err))?;
        info!(
            "{}: piping output to {}",
            config.label,
            config.log_path.display()
        );
        Ok(Self {
            label: config.label,
            log_path: config.log_path,
            ready_token: config.ready_token,
            shared,
            process,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Name given at construction.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Path of the log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Ready token this pipe gates on.
    #[must_use]
    pub fn ready_token(&self) -> &str {
        &self.ready_token
    }

    /// Child process, when the pipe was created with [`OutputPipe::attach`].
    #[must_use]
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Host id announced by the process, if any.
    #[must_use]
    pub fn host_id(&self) -> Option<i32> {
        self.shared.lock().host_id
    }

    /// True once the ready token has been seen.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.lock().ready
    }

    /// True once the reader reached end of input or stopped on a failure.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        let state = self.shared.lock();
        state.eof || state.failure.is_some()
    }

    /// When the initialisation marker first appeared.
    #[must_use]
    pub fn init_mark(&self) -> Option<InitMark> {
        self.shared.lock().init
    }

    /// Time from pipe start to the ready token, once seen.
    #[must_use]
    pub fn startup_elapsed(&self) -> Option<Duration> {
        self.shared.lock().ready_after
    }

    /// Wait up to `timeout` for the ready token.
    ///
    /// Returns `Ok(false)` on timeout or when the stream closed first.
    pub fn wait_ready(&self, timeout: Duration) -> Result<bool, HarnessError> {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .signal
            .wait_timeout_while(state, timeout, |state| pending(state))
            .expect("pipe state lock poisoned");
        settle(&state)
    }

    /// Wait for the ready token with no time limit; the stream closing ends the wait.
    pub fn wait_ready_or_exit(&self) -> Result<bool, HarnessError> {
        let state = self.shared.lock();
        let state = self
            .shared
            .signal
            .wait_while(state, |state| pending(state))
            .expect("pipe state lock poisoned");
        settle(&state)
    }

    /// Wait for the reader thread to finish and return its outcome.
    ///
    /// Later calls return `Ok(())`.
    pub fn join(&self) -> Result<(), HarnessError> {
        let handle = self.reader.lock().expect("pipe reader lock poisoned").take();
        match handle {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for OutputPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPipe")
            .field("label", &self.label)
            .field("log_path", &self.log_path)
            .field("ready_token", &self.ready_token)
            .field("process", &self.process.as_ref().map(ProcessHandle::pid))
            .finish()
    }
}

fn pending(state: &PipeState) -> bool {
    !state.ready && !state.eof && state.failure.is_none()
}

fn settle(state: &PipeState) -> Result<bool, HarnessError> {
    if let Some(line) = &state.failure {
        return Err(HarnessError::MalformedHostId { line: line.clone() });
    }
    Ok(state.ready)
}

fn open_log(path: &Path, append: bool) -> Result<BufWriter<File>, HarnessError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| HarnessError::io(format!("create {}", parent.display()), err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|err| HarnessError::io(format!("open {}", path.display()), err))?;
    Ok(BufWriter::new(file))
}

struct PipeReader<R> {
    label: String,
    input: BufReader<R>,
    writer: BufWriter<File>,
    shared: Arc<PipeShared>,
    ready_token: String,
    init_token: String,
    host_id_token: String,
    watcher: Option<Arc<dyn LineWatcher>>,
    started: Instant,
    ready_seen: bool,
    init_seen: bool,
}

enum LineOutcome {
    Continue,
    Closed,
}

impl<R: Read> PipeReader<R> {
    fn run(mut self) -> Result<(), HarnessError> {
        let mut buf = Vec::new();
        let outcome = loop {
            buf.clear();
            match self.input.read_until(b'\n', &mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\r', '\n']);
                    match self.process_line(line) {
                        Ok(LineOutcome::Continue) => {}
                        Ok(LineOutcome::Closed) => break Ok(()),
                        Err(err) => break Err(err),
                    }
                }
                Err(err) => {
                    warn!("{}: output stream failed, treating as EOF: {err}", self.label);
                    break Ok(());
                }
            }
        };
        self.finish(&outcome);
        outcome
    }

    fn process_line(&mut self, line: &str) -> Result<LineOutcome, HarnessError> {
        if let Some(watcher) = &self.watcher {
            watcher.handle_line(line);
        }

        if line.contains(self.host_id_token.as_str()) {
            let host_id = parse_host_id(line).ok_or_else(|| HarnessError::MalformedHostId {
                line: line.to_owned(),
            })?;
            self.shared.lock().host_id = Some(host_id);
            debug!("{}: announced host id {host_id}", self.label);
        }

        // The default ready token contains the init token; mark init first so the
        // ready log line can report time since init.
        if !self.init_seen && line.contains(self.init_token.as_str()) {
            self.init_seen = true;
            self.shared.lock().init = Some(InitMark {
                at: Utc::now(),
                since_start: self.started.elapsed(),
            });
        }

        if !self.ready_seen && line.contains(self.ready_token.as_str()) {
            self.ready_seen = true;
            let mut state = self.shared.lock();
            let elapsed = self.started.elapsed();
            state.ready = true;
            state.ready_after = Some(elapsed);
            self.shared.signal.notify_all();
            match state.init {
                Some(init) => info!(
                    "{}: ready after {} ms, {} ms after init",
                    self.label,
                    elapsed.as_millis(),
                    elapsed.saturating_sub(init.since_start).as_millis()
                ),
                None => info!("{}: ready after {} ms", self.label, elapsed.as_millis()),
            }
        }

        let written = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(err) = written {
            warn!("{}: log write failed, treating as EOF: {err}", self.label);
            return Ok(LineOutcome::Closed);
        }
        Ok(LineOutcome::Continue)
    }

    fn finish(mut self, outcome: &Result<(), HarnessError>) {
        {
            let mut state = self.shared.lock();
            state.eof = true;
            if let Err(HarnessError::MalformedHostId { line }) = outcome {
                error!("{}: malformed host id announcement '{line}'", self.label);
                state.failure = Some(line.clone());
            }
            self.shared.signal.notify_all();
        }
        if let Some(watcher) = &self.watcher {
            watcher.stream_closed();
        }
        if let Err(err) = self.writer.flush() {
            warn!("{}: final log flush failed: {err}", self.label);
        }
        info!("{}: output closed", self.label);
    }
}
