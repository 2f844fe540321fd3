//! Player status line parsing
//!
//! The external player reports progress on its diagnostic stream as textual
//! status lines. This module isolates the grammar:
//!
//! - Time range: `A: <current> / <total>` or `AV: <current> / <total>`, where
//!   each timestamp is `HH:MM:SS` or `MM:SS`.
//! - Error lines: any line containing one of the error keywords
//!   (case-insensitive).
//!
//! Parsing is independent of process orchestration so it can be tested on
//! plain strings.

use regex::Regex;
use std::sync::OnceLock;

/// Keywords marking a diagnostic line as a failure report.
///
/// Covers resolver tool errors ("ERROR:"), generic failures, and
/// bot-detection refusals from the upstream service.
pub const ERROR_KEYWORDS: &[&str] = &["error", "failure", "bot"];

/// One parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Playback progress extracted from a time-range line
    Progress {
        /// Current position in whole seconds
        position_secs: u64,
        /// Total duration in whole seconds
        duration_secs: u64,
    },

    /// A line matching the error-keyword set
    Error { line: String },
}

fn time_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"A[V]?:\s*(\d+:\d+:\d+|\d+:\d+)\s*/\s*(\d+:\d+:\d+|\d+:\d+)")
            .expect("time range pattern is valid")
    })
}

/// Parse one diagnostic line from the player.
///
/// Returns `None` for lines that are neither progress nor errors (the bulk of
/// the stream).
pub fn parse_status_line(line: &str) -> Option<StatusUpdate> {
    if let Some(caps) = time_range_re().captures(line) {
        let position_secs = parse_timestamp(&caps[1])?;
        let duration_secs = parse_timestamp(&caps[2])?;
        return Some(StatusUpdate::Progress {
            position_secs,
            duration_secs,
        });
    }

    if contains_error_keyword(line) {
        return Some(StatusUpdate::Error {
            line: line.trim().to_string(),
        });
    }

    None
}

/// Convert a `MM:SS` or `HH:MM:SS` timestamp to whole seconds.
pub fn parse_timestamp(timestamp: &str) -> Option<u64> {
    let parts: Vec<&str> = timestamp.split(':').collect();
    let fields: Vec<u64> = parts
        .iter()
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    match fields.as_slice() {
        [minutes, seconds] => Some(minutes * 60 + seconds),
        [hours, minutes, seconds] => Some(hours * 3600 + minutes * 60 + seconds),
        _ => None,
    }
}

/// Check a line against the error-keyword set, case-insensitively.
pub fn contains_error_keyword(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Format whole seconds as `MM:SS` or `H:MM:SS` for status display.
pub fn format_timestamp(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
