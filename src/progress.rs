//! Running aggregation of transfer statistics.
//!
//! The aggregator folds the log stream into running totals while deciding,
//! per record, which event (if any) to hand to the caller's callback.

use std::time::{Duration, Instant};

use crate::events::{classify, Classified, ErrorEvent, LogRecord, TransferEvent, TransferStats};

/// Final aggregate for one completed operation.
///
/// Constructed once the process has exited and the stream is drained;
/// byte and transfer counts are the last cumulative snapshot rclone
/// reported, not a sum over events.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Process exit code; `-1` when terminated by a signal.
    pub exit_code: i32,
    /// Wall-clock duration of the whole call.
    pub elapsed: Duration,
    /// Cumulative bytes transferred.
    pub bytes_transferred: u64,
    /// Total bytes, if rclone ever reported one.
    pub total_bytes: Option<u64>,
    /// Number of completed transfers.
    pub transfers: u64,
    /// Error events in the order they were produced.
    pub errors: Vec<ErrorEvent>,
    /// Lines that failed structural decoding and were skipped.
    pub decode_failures: u64,
    /// Well-formed records that carried neither stats nor an error.
    pub ignored: u64,
}

impl CommandResult {
    /// Whether the operation succeeded. The exit code is authoritative:
    /// a zero exit with recorded error events still counts as success.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub type CopyResult = CommandResult;
pub type SyncResult = CommandResult;
pub type MoveResult = CommandResult;

/// Folds decoded log lines into running totals and gates event delivery.
#[derive(Debug)]
pub struct Aggregator {
    bytes: u64,
    total_bytes: Option<u64>,
    transfers: u64,
    errors: Vec<ErrorEvent>,
    decode_failures: u64,
    ignored: u64,
    min_interval: Option<Duration>,
    last_delivery: Option<Instant>,
    withheld: Option<TransferEvent>,
}

impl Aggregator {
    /// Create an aggregator. With `min_interval` set, progress events inside
    /// the interval are folded into the totals but withheld from delivery;
    /// error events are never withheld.
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self {
            bytes: 0,
            total_bytes: None,
            transfers: 0,
            errors: Vec::new(),
            decode_failures: 0,
            ignored: 0,
            min_interval,
            last_delivery: None,
            withheld: None,
        }
    }

    /// Fold one raw line, returning the event to deliver, if any.
    pub fn ingest(&mut self, line: &str) -> Option<TransferEvent> {
        self.ingest_at(line, Instant::now())
    }

    fn ingest_at(&mut self, line: &str, now: Instant) -> Option<TransferEvent> {
        let record = match LogRecord::decode(line) {
            Ok(record) => record,
            Err(err) => {
                self.decode_failures += 1;
                tracing::debug!(error = %err, "skipping undecodable log line");
                return None;
            }
        };

        if let Some(ref stats) = record.stats {
            self.fold(stats);
        }

        match classify(&record, line) {
            Classified::Error(event) => {
                self.errors.push(event.clone());
                Some(TransferEvent::Error(event))
            }
            Classified::Progress(event) => {
                let event = TransferEvent::Progress(event);
                match self.min_interval {
                    Some(interval) => {
                        let due = match self.last_delivery {
                            Some(last) => now.duration_since(last) >= interval,
                            None => true,
                        };
                        if due {
                            self.last_delivery = Some(now);
                            self.withheld = None;
                            Some(event)
                        } else {
                            self.withheld = Some(event);
                            None
                        }
                    }
                    None => Some(event),
                }
            }
            Classified::Ignored => {
                self.ignored += 1;
                None
            }
        }
    }

    fn fold(&mut self, stats: &TransferStats) {
        self.bytes = stats.bytes;
        if let Some(total) = stats.known_total() {
            // rclone revises its estimate as it discovers files; later
            // reports override earlier ones.
            self.total_bytes = Some(total);
        }
        self.transfers = stats.transfers;
    }

    /// The most recent progress event withheld by sampling, if any.
    /// Delivered at end of stream so the final snapshot is never dropped.
    pub fn flush(&mut self) -> Option<TransferEvent> {
        self.withheld.take()
    }

    /// Fold the accumulated state into a result. Called once the exit code
    /// is known and the stream is drained (or the operation aborted).
    pub fn finalize(&self, exit_code: i32, elapsed: Duration) -> CommandResult {
        CommandResult {
            exit_code,
            elapsed,
            bytes_transferred: self.bytes,
            total_bytes: self.total_bytes,
            transfers: self.transfers,
            errors: self.errors.clone(),
            decode_failures: self.decode_failures,
            ignored: self.ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_line(bytes: u64, total: u64, transfers: u64) -> String {
        format!(
            r#"{{"level":"info","msg":"Progress","stats":{{"bytes":{},"totalBytes":{},"speed":100,"transfers":{}}},"time":"2025-01-01T00:00:01Z"}}"#,
            bytes, total, transfers
        )
    }

    #[test]
    fn test_progress_scenario() {
        // info without stats, then three cumulative snapshots, exit 0.
        let mut aggregator = Aggregator::new(None);
        let mut delivered = Vec::new();

        let lines = vec![
            r#"{"level":"info","msg":"Starting transfer","time":"2025-01-01T00:00:00Z"}"#.to_string(),
            stats_line(1000, 10000, 0),
            stats_line(5000, 10000, 0),
            stats_line(10000, 10000, 1),
        ];
        for line in &lines {
            if let Some(event) = aggregator.ingest(line) {
                delivered.push(event);
            }
        }

        assert_eq!(delivered.len(), 3);
        let result = aggregator.finalize(0, Duration::from_secs(10));
        assert!(result.success());
        assert_eq!(result.bytes_transferred, 10000);
        assert_eq!(result.total_bytes, Some(10000));
        assert_eq!(result.transfers, 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.ignored, 1);
        assert_eq!(result.decode_failures, 0);
    }

    #[test]
    fn test_error_scenario() {
        let mut aggregator = Aggregator::new(None);
        let line = r#"{"level":"error","msg":"no such remote","time":"2025-01-01T00:00:00Z"}"#;

        let event = aggregator.ingest(line);
        assert!(matches!(event, Some(TransferEvent::Error(_))));

        let result = aggregator.finalize(1, Duration::from_secs(1));
        assert!(!result.success());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].msg, "no such remote");
    }

    #[test]
    fn test_malformed_lines_do_not_abort() {
        let mut aggregator = Aggregator::new(None);
        let mut delivered = 0;

        let lines = [
            stats_line(100, 1000, 0),
            "garbage".to_string(),
            stats_line(500, 1000, 0),
            r#"{"level":"info","#.to_string(),
            stats_line(1000, 1000, 1),
        ];
        for line in &lines {
            if aggregator.ingest(line).is_some() {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 3);
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert_eq!(result.decode_failures, 2);
        assert_eq!(result.bytes_transferred, 1000);
    }

    #[test]
    fn test_delivery_preserves_line_order() {
        let mut aggregator = Aggregator::new(None);
        let mut seen = Vec::new();

        for line in [
            stats_line(1, 100, 0),
            r#"{"level":"error","msg":"first error"}"#.to_string(),
            stats_line(2, 100, 0),
            r#"{"level":"error","msg":"second error"}"#.to_string(),
        ] {
            if let Some(event) = aggregator.ingest(&line) {
                seen.push(event);
            }
        }

        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[0], TransferEvent::Progress(ref p) if p.bytes == 1));
        assert!(matches!(seen[1], TransferEvent::Error(ref e) if e.msg == "first error"));
        assert!(matches!(seen[2], TransferEvent::Progress(ref p) if p.bytes == 2));
        assert!(matches!(seen[3], TransferEvent::Error(ref e) if e.msg == "second error"));
    }

    #[test]
    fn test_bytes_are_snapshots_not_deltas() {
        let mut aggregator = Aggregator::new(None);
        for line in [stats_line(4000, 10000, 0), stats_line(9000, 10000, 0)] {
            aggregator.ingest(&line);
        }
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert_eq!(result.bytes_transferred, 9000);
    }

    #[test]
    fn test_total_bytes_revised_by_later_reports() {
        let mut aggregator = Aggregator::new(None);
        aggregator.ingest(&stats_line(100, 1000, 0));
        aggregator.ingest(&stats_line(200, 5000, 0));
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert_eq!(result.total_bytes, Some(5000));
    }

    #[test]
    fn test_total_bytes_kept_when_later_report_omits_it() {
        let mut aggregator = Aggregator::new(None);
        aggregator.ingest(&stats_line(100, 1000, 0));
        aggregator.ingest(
            r#"{"level":"info","msg":"p","stats":{"bytes":200,"speed":0,"transfers":0}}"#,
        );
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert_eq!(result.total_bytes, Some(1000));
        assert_eq!(result.bytes_transferred, 200);
    }

    #[test]
    fn test_sampling_withholds_then_flushes_latest() {
        let mut aggregator = Aggregator::new(Some(Duration::from_secs(1)));
        let t0 = Instant::now();

        // First event always delivered.
        assert!(aggregator
            .ingest_at(&stats_line(100, 1000, 0), t0)
            .is_some());
        // Inside the interval: folded but withheld.
        assert!(aggregator
            .ingest_at(&stats_line(200, 1000, 0), t0 + Duration::from_millis(100))
            .is_none());
        assert!(aggregator
            .ingest_at(&stats_line(300, 1000, 0), t0 + Duration::from_millis(200))
            .is_none());

        // End of stream: the latest withheld snapshot is delivered.
        match aggregator.flush() {
            Some(TransferEvent::Progress(event)) => assert_eq!(event.bytes, 300),
            other => panic!("expected flushed progress, got {:?}", other),
        }
        assert!(aggregator.flush().is_none());

        // Totals reflect every snapshot regardless of delivery.
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert_eq!(result.bytes_transferred, 300);
    }

    #[test]
    fn test_sampling_delivers_after_interval() {
        let mut aggregator = Aggregator::new(Some(Duration::from_secs(1)));
        let t0 = Instant::now();

        assert!(aggregator.ingest_at(&stats_line(100, 1000, 0), t0).is_some());
        assert!(aggregator
            .ingest_at(&stats_line(200, 1000, 0), t0 + Duration::from_millis(500))
            .is_none());
        let event = aggregator.ingest_at(&stats_line(300, 1000, 0), t0 + Duration::from_millis(1500));
        assert!(matches!(
            event,
            Some(TransferEvent::Progress(ref p)) if p.bytes == 300
        ));
        // The superseded withheld event is gone.
        assert!(aggregator.flush().is_none());
    }

    #[test]
    fn test_sampling_never_withholds_errors() {
        let mut aggregator = Aggregator::new(Some(Duration::from_secs(60)));
        let t0 = Instant::now();

        assert!(aggregator.ingest_at(&stats_line(100, 1000, 0), t0).is_some());
        let event = aggregator.ingest_at(
            r#"{"level":"error","msg":"boom"}"#,
            t0 + Duration::from_millis(10),
        );
        assert!(matches!(event, Some(TransferEvent::Error(_))));
    }

    #[test]
    fn test_nonzero_exit_without_errors_is_failure() {
        let aggregator = Aggregator::new(None);
        let result = aggregator.finalize(3, Duration::from_secs(1));
        assert!(!result.success());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_zero_exit_with_errors_is_success() {
        let mut aggregator = Aggregator::new(None);
        aggregator.ingest(r#"{"level":"error","msg":"retried and recovered"}"#);
        let result = aggregator.finalize(0, Duration::from_secs(1));
        assert!(result.success());
        assert_eq!(result.errors.len(), 1);
    }
}
