//! Decoding rclone's JSON log stream.
//!
//! With `--use-json-log` rclone writes one self-contained JSON record per
//! stderr line. The field names here follow that output and must not be
//! renamed: `level`, `msg`, `time` and the optional `stats` object with
//! `bytes`, `totalBytes`, `speed` and `transfers`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::format::format_bytes;

/// Severity levels used by rclone's JSON log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    /// Level string this crate does not recognize; the record still decodes.
    #[serde(other)]
    Unknown,
}

impl LogLevel {
    /// Whether a record at this level is surfaced as an [`ErrorEvent`].
    pub fn is_error(self) -> bool {
        matches!(self, LogLevel::Panic | LogLevel::Fatal | LogLevel::Error)
    }
}

/// Cumulative transfer statistics embedded in a stats record.
///
/// Values are running snapshots, not deltas. `totalBytes` may be absent or
/// non-positive while rclone is still sizing the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TransferStats {
    #[serde(default)]
    pub bytes: u64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: Option<i64>,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub transfers: u64,
}

impl TransferStats {
    /// Total bytes, if rclone has reported a usable estimate.
    pub fn known_total(&self) -> Option<u64> {
        self.total_bytes.filter(|t| *t > 0).map(|t| t as u64)
    }
}

/// One decoded line of rclone's structured log output.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    #[serde(default)]
    pub msg: String,
    pub stats: Option<TransferStats>,
    pub time: Option<DateTime<Utc>>,
}

impl LogRecord {
    /// Decode one line of output.
    ///
    /// Failures are per-line: the caller records them and continues with the
    /// next line, since rclone output may include banner text or a truncated
    /// final line.
    pub fn decode(line: &str) -> Result<LogRecord, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Progress snapshot delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Bytes transferred so far (cumulative).
    pub bytes: u64,
    /// Total bytes, if known.
    pub total_bytes: Option<u64>,
    /// Current transfer speed in bytes per second.
    pub speed: f64,
    /// Number of completed transfers.
    pub transfers: u64,
    /// Timestamp reported by rclone for this record.
    pub time: Option<DateTime<Utc>>,
}

impl ProgressEvent {
    pub(crate) fn from_stats(stats: &TransferStats, time: Option<DateTime<Utc>>) -> Self {
        Self {
            bytes: stats.bytes,
            total_bytes: stats.known_total(),
            speed: stats.speed,
            transfers: stats.transfers,
            time,
        }
    }

    /// Percent complete, if the total is known.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total_bytes?;
        Some((self.bytes as f64 / total as f64 * 100.0).min(100.0))
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.total_bytes, self.percent()) {
            (Some(total), Some(percent)) => write!(
                f,
                "{} / {} ({:.1}%) at {}/s",
                format_bytes(self.bytes as f64),
                format_bytes(total as f64),
                percent,
                format_bytes(self.speed)
            ),
            _ => write!(
                f,
                "{} at {}/s",
                format_bytes(self.bytes as f64),
                format_bytes(self.speed)
            ),
        }
    }
}

/// Error reported by rclone while the operation was in flight.
///
/// Delivery of an error event does not terminate the stream; the final exit
/// code decides success.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub msg: String,
    pub time: Option<DateTime<Utc>>,
    /// The raw log line the event was decoded from.
    pub raw: String,
}

/// Event stream delivered to a progress callback, in line order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Progress(ProgressEvent),
    Error(ErrorEvent),
}

/// Classification of one decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Progress(ProgressEvent),
    Error(ErrorEvent),
    /// Info-only record with no statistics; counted but not surfaced.
    Ignored,
}

/// Classify a decoded record.
///
/// Error severity wins over the presence of statistics.
pub fn classify(record: &LogRecord, raw: &str) -> Classified {
    if record.level.is_error() {
        return Classified::Error(ErrorEvent {
            msg: record.msg.clone(),
            time: record.time,
            raw: raw.to_string(),
        });
    }
    match record.stats {
        Some(ref stats) => Classified::Progress(ProgressEvent::from_stats(stats, record.time)),
        None => Classified::Ignored,
    }
}
