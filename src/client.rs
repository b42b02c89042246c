//! High-level rclone operations.
//!
//! Builds argument vectors for copy/sync/move/list, supervises the process,
//! and turns the JSON log stream into events and a final result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RcloneConfig;
use crate::error::RcloneError;
use crate::events::TransferEvent;
use crate::listing::{self, ListResult};
use crate::process::{OutputLine, ProcessGuard};
use crate::progress::{Aggregator, CommandResult, CopyResult, MoveResult, SyncResult};

/// Responsiveness bound for cancellation while blocked on the line channel.
const RECV_TICK: Duration = Duration::from_millis(100);

/// Interval at which rclone emits stats records.
const STATS_INTERVAL: &str = "1s";

/// Cooperative cancellation for an in-flight operation.
///
/// Clone the token, hand one clone to the call and keep the other; `cancel`
/// is observed at the operation's next suspension point, after which no
/// further events are delivered and the process is terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call knobs for a transfer or listing.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Bound on the whole call: spawn, stream drain and exit wait.
    /// Falls back to the config default when unset.
    pub timeout: Option<Duration>,
    /// Treat a non-zero exit as [`RcloneError::ProcessExit`] instead of a
    /// result with `success() == false`. Falls back to the config default.
    pub strict: Option<bool>,
    pub cancel: Option<CancelToken>,
    /// Minimum interval between delivered progress events. Withheld events
    /// still update the aggregate.
    pub min_progress_interval: Option<Duration>,
    /// Pass `--dry-run` to rclone.
    pub dry_run: bool,
    /// Extra flags appended verbatim to the argument vector.
    pub extra_args: Vec<String>,
}

/// Options for list operations.
#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Recurse into subdirectories.
    pub recursive: bool,
    /// Ask the remote for file hashes (`--hash`); slow on some providers.
    pub hashes: bool,
    pub exec: ExecOptions,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            hashes: false,
            exec: ExecOptions::default(),
        }
    }
}

enum Abort {
    Cancelled,
    TimedOut,
}

/// Client for running rclone operations.
pub struct Rclone {
    config: RcloneConfig,
}

impl Rclone {
    /// Build a client, validating the configuration.
    pub fn new(config: RcloneConfig) -> Result<Self, RcloneError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Locate rclone on `PATH` and build a client with default settings.
    pub fn discover() -> Result<Self, RcloneError> {
        Self::new(RcloneConfig::discover()?)
    }

    /// Copy files from `source` to `dest`.
    pub fn copy(&self, source: &str, dest: &str) -> Result<CopyResult, RcloneError> {
        self.copy_with(source, dest, &ExecOptions::default(), |_| {})
    }

    /// Copy with options and a progress callback.
    pub fn copy_with<F>(
        &self,
        source: &str,
        dest: &str,
        opts: &ExecOptions,
        on_event: F,
    ) -> Result<CopyResult, RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        self.transfer("copy", source, dest, opts, on_event)
    }

    /// Sync `source` to `dest`, deleting extraneous destination files.
    pub fn sync(&self, source: &str, dest: &str) -> Result<SyncResult, RcloneError> {
        self.sync_with(source, dest, &ExecOptions::default(), |_| {})
    }

    /// Sync with options and a progress callback.
    pub fn sync_with<F>(
        &self,
        source: &str,
        dest: &str,
        opts: &ExecOptions,
        on_event: F,
    ) -> Result<SyncResult, RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        self.transfer("sync", source, dest, opts, on_event)
    }

    /// Move files from `source` to `dest`.
    pub fn move_to(&self, source: &str, dest: &str) -> Result<MoveResult, RcloneError> {
        self.move_with(source, dest, &ExecOptions::default(), |_| {})
    }

    /// Move with options and a progress callback.
    pub fn move_with<F>(
        &self,
        source: &str,
        dest: &str,
        opts: &ExecOptions,
        on_event: F,
    ) -> Result<MoveResult, RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        self.transfer("move", source, dest, opts, on_event)
    }

    /// List `target` via `lsjson`.
    pub fn list(&self, target: &str) -> Result<ListResult, RcloneError> {
        self.list_with(target, &ListOptions::default(), |_| {})
    }

    /// List with options and a progress callback (errors surface as events).
    pub fn list_with<F>(
        &self,
        target: &str,
        opts: &ListOptions,
        on_event: F,
    ) -> Result<ListResult, RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        let args = list_args(target, opts);
        let (summary, stdout) = self.execute(args, "lsjson", &opts.exec, true, on_event)?;

        // Exit code is authoritative; don't try to parse a failed run.
        if !summary.success() {
            return Ok(ListResult {
                entries: Vec::new(),
                summary,
            });
        }

        let entries = listing::parse_entries(&stdout)?;
        Ok(ListResult { entries, summary })
    }

    fn transfer<F>(
        &self,
        verb: &str,
        source: &str,
        dest: &str,
        opts: &ExecOptions,
        on_event: F,
    ) -> Result<CommandResult, RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        let args = transfer_args(verb, source, dest, opts);
        let (result, _stdout) = self.execute(args, verb, opts, false, on_event)?;
        Ok(result)
    }

    /// Run one rclone invocation: spawn, drain both streams, deliver events,
    /// wait for exit and fold the aggregate into a result.
    fn execute<F>(
        &self,
        op_args: Vec<String>,
        command_name: &str,
        opts: &ExecOptions,
        capture_stdout: bool,
        mut on_event: F,
    ) -> Result<(CommandResult, String), RcloneError>
    where
        F: FnMut(TransferEvent),
    {
        let started = Instant::now();
        let timeout = opts.timeout.or(self.config.default_timeout());
        let deadline = timeout.map(|t| started + t);
        let strict = opts.strict.unwrap_or(self.config.strict());

        let argv = self.config.command_args(op_args, &opts.extra_args);
        let mut guard =
            ProcessGuard::spawn(self.config.binary(), &argv, self.config.env(), command_name)?;
        let (rx, pumps) = guard.pump_output();

        let mut aggregator = Aggregator::new(opts.min_progress_interval);
        let mut stdout_lines: Vec<String> = Vec::new();

        let abort = loop {
            if opts.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                break Some(Abort::Cancelled);
            }
            let now = Instant::now();
            let mut wait = RECV_TICK;
            if let Some(deadline) = deadline {
                if now >= deadline {
                    break Some(Abort::TimedOut);
                }
                wait = wait.min(deadline - now);
            }
            match rx.recv_timeout(wait) {
                Ok(OutputLine::Stderr(line)) => {
                    if let Some(event) = aggregator.ingest(&line) {
                        on_event(event);
                    }
                }
                Ok(OutputLine::Stdout(line)) => {
                    if capture_stdout {
                        stdout_lines.push(line);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };

        match abort {
            Some(reason) => {
                guard.terminate();
                for pump in pumps {
                    let _ = pump.join();
                }
                let elapsed = started.elapsed();
                let partial = aggregator.finalize(guard.exit_code().unwrap_or(-1), elapsed);
                Err(match reason {
                    Abort::Cancelled => RcloneError::Cancelled { partial },
                    Abort::TimedOut => RcloneError::Timeout { elapsed, partial },
                })
            }
            None => {
                // Streams closed; deliver the final withheld snapshot, then
                // collect the exit code (bounded by the same deadline).
                if let Some(event) = aggregator.flush() {
                    on_event(event);
                }
                for pump in pumps {
                    let _ = pump.join();
                }
                let (code, timed_out) = match guard.wait_deadline(deadline) {
                    Ok(outcome) => outcome,
                    Err(source) => {
                        let partial = aggregator.finalize(-1, started.elapsed());
                        return Err(RcloneError::Wait { source, partial });
                    }
                };
                let elapsed = started.elapsed();
                if timed_out {
                    let partial = aggregator.finalize(code, elapsed);
                    return Err(RcloneError::Timeout {
                        elapsed,
                        partial,
                    });
                }

                let result = aggregator.finalize(code, elapsed);
                if strict && !result.success() {
                    return Err(RcloneError::ProcessExit { result });
                }
                Ok((result, stdout_lines.join("\n")))
            }
        }
    }
}

/// Build the argument vector for a transfer operation.
fn transfer_args(verb: &str, source: &str, dest: &str, opts: &ExecOptions) -> Vec<String> {
    let mut args = vec![
        verb.to_string(),
        source.to_string(),
        dest.to_string(),
        "--use-json-log".to_string(),
        "--verbose".to_string(),
        "--stats".to_string(),
        STATS_INTERVAL.to_string(),
    ];
    if opts.dry_run {
        args.push("--dry-run".to_string());
    }
    args
}

/// Build the argument vector for a list operation.
fn list_args(target: &str, opts: &ListOptions) -> Vec<String> {
    let mut args = vec!["lsjson".to_string(), "--use-json-log".to_string()];
    if opts.recursive {
        args.push("--recursive".to_string());
    }
    if opts.hashes {
        args.push("--hash".to_string());
    }
    args.push(target.to_string());
    args
}
