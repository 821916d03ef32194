//! Structured fields recovered from backup tool text output.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{Severity, WithMsg, WithSeverity};
use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// `asctime` layout used by duplicity, e.g. `Tue Oct 11 10:00:00 2016`.
pub static DUPLICITY_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %Y";
/// Marker value duplicity prints when a target holds no full backup yet.
pub static NO_BACKUP_SENTINEL: &str = "none";

static FULL_BACKUP_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("Last full backup date: (.+)").expect("valid full backup regex"));
static CHAIN_END_TIME_RX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("Chain end time: (.+)").expect("valid chain end regex"));

/// Backup chain state reported by `duplicity collection-status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectionStatus {
    pub last_full_backup: DateTime<Utc>,
    pub chain_end_time: DateTime<Utc>,
}

impl CollectionStatus {
    /// Status of a target that never received a backup.
    pub fn empty() -> Self {
        Self {
            last_full_backup: DateTime::UNIX_EPOCH,
            chain_end_time: DateTime::UNIX_EPOCH,
        }
    }
}

fn first_capture<'a>(rx: &Regex, output: &'a str) -> Option<&'a str> {
    rx.captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parses one duplicity timestamp as UTC.
///
/// Runs of whitespace are collapsed first, `asctime` pads single digit days
/// with a space.
pub fn parse_duplicity_time(value: &str) -> Result<DateTime<Utc>> {
    let normalized = value.split_whitespace().join(" ");
    NaiveDateTime::parse_from_str(&normalized, DUPLICITY_TIME_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(Error::from)
        .with_msg(format!("Failed to parse date {value:?}"))
}

/// Extracts the last full backup date and the chain end time.
///
/// Only the first occurrence of each marker counts. A `none` full backup
/// date maps both values to the Unix epoch without parsing anything. Missing
/// markers are reported as [`Error::MissingField`], unparsable dates carry
/// [`Severity::Error`].
pub fn parse_collection_status(output: &str) -> Result<CollectionStatus> {
    let full_backup = first_capture(&FULL_BACKUP_RX, output).ok_or(Error::MissingField {
        tool: "duplicity",
        field: "Last full backup date",
    })?;

    if full_backup == NO_BACKUP_SENTINEL {
        return Ok(CollectionStatus::empty());
    }

    let last_full_backup = parse_duplicity_time(full_backup)
        .with_msg("Failed to parse full backup date")
        .with_severity(Severity::Error)?;

    let chain_end = first_capture(&CHAIN_END_TIME_RX, output).ok_or(Error::MissingField {
        tool: "duplicity",
        field: "Chain end time",
    })?;
    let chain_end_time = parse_duplicity_time(chain_end)
        .with_msg("Failed to parse chain end time date")
        .with_severity(Severity::Error)?;

    Ok(CollectionStatus {
        last_full_backup,
        chain_end_time,
    })
}

/// Final `summary` message of `restic backup --json`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ResticSummary {
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub data_added: u64,
    #[serde(default)]
    pub total_duration: f64,
}

#[derive(Deserialize)]
struct ResticMessage {
    message_type: String,
}

/// Finds the last summary line in restic JSON output, skipping any line that
/// is not a JSON message.
pub fn parse_restic_summary(output: &str) -> Result<ResticSummary> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find(|line| {
            serde_json::from_str::<ResticMessage>(line)
                .map(|m| m.message_type == "summary")
                .unwrap_or(false)
        })
        .ok_or(Error::MissingField {
            tool: "restic",
            field: "summary",
        })
        .and_then(|line| serde_json::from_str(line).map_err(Error::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    static STATUS_OUTPUT: &str = "\
Local and Remote metadata are synchronized, no sync needed.\r
Last full backup date: Tue Oct 11 10:00:00 2016\r
Collection Status\r
-----------------\r
Connecting with backend: BackendWrapper\r
Archive dir: /root/.cache/duplicity/db1\r
\r
Found 0 secondary backup chains.\r
\r
Found primary backup chain with matching signature chain:\r
-------------------------\r
Chain start time: Tue Oct 11 10:00:00 2016\r
Chain end time: Wed Oct 12 10:00:00 2016\r
Number of contained backup sets: 2\r
Total number of contained volumes: 2\r
No orphaned or incomplete backup sets found.\r
";

    #[test]
    fn test_parse_collection_status() {
        let status = parse_collection_status(STATUS_OUTPUT).unwrap();
        assert_eq!(status.last_full_backup.timestamp(), 1476180000);
        assert_eq!(status.chain_end_time.timestamp(), 1476266400);
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(
            parse_collection_status(STATUS_OUTPUT).unwrap(),
            parse_collection_status(STATUS_OUTPUT).unwrap()
        );
    }

    #[test]
    fn test_none_sentinel_maps_to_epoch() {
        let output = "Last full backup date: none\nChain end time: not a date\n";
        let status = parse_collection_status(output).unwrap();
        assert_eq!(status, CollectionStatus::empty());
        assert_eq!(status.last_full_backup.timestamp(), 0);
        assert_eq!(status.chain_end_time.timestamp(), 0);
    }

    #[test]
    fn test_sentinel_is_case_sensitive() {
        let err = parse_collection_status("Last full backup date: None\n").unwrap_err();
        assert_eq!(err.severity(), Severity::Error);
    }

    #[test]
    fn test_missing_full_backup_marker() {
        let err =
            parse_collection_status("Chain end time: Wed Oct 12 10:00:00 2016\n").unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "Last full backup date", .. }));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn test_missing_chain_end_marker() {
        let err = parse_collection_status("Last full backup date: Tue Oct 11 10:00:00 2016\n")
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "Chain end time", .. }));
    }

    #[test]
    fn test_bad_chain_end_date_is_error_severity() {
        let output = "Last full backup date: Tue Oct 11 10:00:00 2016\nChain end time: yesterday\n";
        let err = parse_collection_status(output).unwrap_err();
        assert_eq!(err.severity(), Severity::Error);
        assert!(err.to_string().contains("chain end time"));
    }

    #[test]
    fn test_first_match_wins() {
        let output = "\
Last full backup date: Tue Oct 11 10:00:00 2016
Chain end time: Wed Oct 12 10:00:00 2016
Last full backup date: Thu Mar 14 23:59:59 2024
Chain end time: Thu Mar 14 23:59:59 2024
";
        let status = parse_collection_status(output).unwrap();
        assert_eq!(status.chain_end_time.timestamp(), 1476266400);
    }

    #[test]
    fn test_space_padded_day() {
        let dt = parse_duplicity_time("Tue Mar  5 08:15:30 2024").unwrap();
        assert_eq!(dt.timestamp(), 1709626530);
    }

    #[test]
    fn test_parse_restic_summary() {
        let output = r#"{"message_type":"status","percent_done":0.5}
{"message_type":"status","percent_done":1}
{"message_type":"summary","files_new":3,"files_changed":1,"data_added":1024,"total_duration":1.5,"snapshot_id":"abc123"}
"#;
        let summary = parse_restic_summary(output).unwrap();
        assert_eq!(summary.snapshot_id.as_deref(), Some("abc123"));
        assert_eq!(summary.files_new, 3);
        assert_eq!(summary.data_added, 1024);
    }

    #[test]
    fn test_parse_restic_summary_missing() {
        let err = parse_restic_summary("Fatal: unable to open repository\n").unwrap_err();
        assert!(matches!(err, Error::MissingField { tool: "restic", .. }));
    }
}
