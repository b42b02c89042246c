//! rclone-adapter: drive the rclone binary as a supervised subprocess.
//!
//! Spawns rclone with a controlled environment, decodes its JSON log stream
//! into typed progress and error events while the transfer is running, and
//! folds the stream into a final result once the process exits. Timeouts and
//! cancellation reliably terminate the process on every exit path.
//!
//! ```no_run
//! use rclone_adapter::{Rclone, RcloneConfig};
//!
//! # fn main() -> Result<(), rclone_adapter::RcloneError> {
//! let client = Rclone::new(RcloneConfig::discover()?)?;
//! let result = client.copy("remote:photos", "/backup/photos")?;
//! println!("copied {} bytes in {:?}", result.bytes_transferred, result.elapsed);
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod listing;
pub mod process;
pub mod progress;

pub use client::{CancelToken, ExecOptions, ListOptions, Rclone};
pub use config::RcloneConfig;
pub use error::RcloneError;
pub use events::{
    Classified, ErrorEvent, LogLevel, LogRecord, ProgressEvent, TransferEvent, TransferStats,
};
pub use listing::{ListEntry, ListResult};
pub use process::{OutputLine, ProcessGuard};
pub use progress::{Aggregator, CommandResult, CopyResult, MoveResult, SyncResult};
