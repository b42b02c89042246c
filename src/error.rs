//! Error types for rclone operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::progress::CommandResult;

/// Errors surfaced by this crate.
///
/// Aborting variants that fire after the process has started carry the
/// partial aggregate collected up to that point, so progress observed before
/// the failure is never lost.
#[derive(Debug, Error)]
pub enum RcloneError {
    /// No rclone binary was found on `PATH`.
    #[error("rclone not found; install it from https://rclone.org/install/ or point RcloneConfig at the binary")]
    NotFound,

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The OS refused to start the process.
    #[error("failed to spawn {binary:?}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The operation exceeded its timeout and the process was terminated.
    #[error("operation timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        partial: CommandResult,
    },

    /// The operation was cancelled via its [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled { partial: CommandResult },

    /// The process exited non-zero and the call ran in strict mode.
    #[error("rclone exited with status {}", .result.exit_code)]
    ProcessExit { result: CommandResult },

    /// The exit status could not be retrieved from the OS.
    #[error("failed to collect exit status: {source}")]
    Wait {
        #[source]
        source: io::Error,
        partial: CommandResult,
    },

    /// `lsjson` ran successfully but its stdout payload was unparseable.
    #[error("failed to parse lsjson output: {reason}")]
    ListOutput { reason: String },
}
