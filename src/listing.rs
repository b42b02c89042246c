//! Parsing of `rclone lsjson` output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RcloneError;
use crate::progress::CommandResult;

/// One entry from a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntry {
    pub path: String,
    /// Size in bytes; rclone reports `-1` when the size is unknown.
    pub size: i64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub hash: Option<String>,
    pub hash_type: Option<String>,
}

/// Result of a list operation: parsed entries plus the run summary.
///
/// When the process exits non-zero in non-strict mode the entries are empty
/// and the summary carries the failure.
#[derive(Debug, Clone)]
pub struct ListResult {
    pub entries: Vec<ListEntry>,
    pub summary: CommandResult,
}

/// Internal representation of rclone lsjson output
#[derive(Debug, Clone, Deserialize)]
struct LsJsonEntry {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Size")]
    size: i64,
    #[serde(rename = "ModTime")]
    mod_time: Option<DateTime<Utc>>,
    #[serde(rename = "IsDir")]
    is_dir: bool,
    #[serde(rename = "Hashes")]
    hashes: Option<HashMap<String, String>>,
}

impl From<LsJsonEntry> for ListEntry {
    fn from(entry: LsJsonEntry) -> Self {
        let (hash, hash_type) = select_hash(entry.hashes.as_ref());
        Self {
            path: entry.path,
            size: entry.size,
            modified: entry.mod_time,
            is_dir: entry.is_dir,
            hash,
            hash_type,
        }
    }
}

/// Parse the stdout payload of a successful `lsjson` run.
///
/// Tolerates log noise before or after the JSON array, since rclone may
/// interleave diagnostics on stdout under some configurations.
pub(crate) fn parse_entries(raw: &str) -> Result<Vec<ListEntry>, RcloneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RcloneError::ListOutput {
            reason: "lsjson returned empty output".to_string(),
        });
    }

    if let Ok(entries) = serde_json::from_str::<Vec<LsJsonEntry>>(trimmed) {
        return Ok(entries.into_iter().map(ListEntry::from).collect());
    }

    if let Some(payload) = extract_json_payload(trimmed) {
        if let Ok(entries) = serde_json::from_str::<Vec<LsJsonEntry>>(payload) {
            return Ok(entries.into_iter().map(ListEntry::from).collect());
        }
    }

    let preview = trimmed.lines().take(3).collect::<Vec<_>>().join(" ");
    Err(RcloneError::ListOutput {
        reason: format!("output started with: {}", preview),
    })
}

fn extract_json_payload(raw: &str) -> Option<&str> {
    if let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) {
        if end > start {
            return Some(&raw[start..=end]);
        }
    }
    None
}

fn select_hash(hashes: Option<&HashMap<String, String>>) -> (Option<String>, Option<String>) {
    let hashes = match hashes {
        Some(h) => h,
        None => return (None, None),
    };

    let preferred = ["sha256", "sha1", "md5", "quickxorhash", "dropbox"];
    for key in preferred.iter() {
        if let Some(value) = hashes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
        {
            return (Some(value.clone()), Some(key.to_string()));
        }
    }

    // Fallback to first hash if available
    if let Some((k, v)) = hashes.iter().next() {
        return (Some(v.clone()), Some(k.clone()));
    }

    (None, None)
}
