//! Failure diagnosis from captured output
//!
//! A failing case usually explains itself somewhere in its log. The first
//! matching category wins; matching is case-insensitive.

use std::fmt;

/// Category of a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    MissingModule,
    PermissionDenied,
    MissingFile,
    NetworkUnreachable,
    NetworkTimeout,
    OutOfMemory,
    DiskFull,
    FailureMarker,
    Unknown,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::MissingModule => "missing module: a dependency of the case could not be imported",
            FailureCategory::PermissionDenied => "permission denied: a file or directory could not be accessed",
            FailureCategory::MissingFile => "missing file: a required file or directory does not exist",
            FailureCategory::NetworkUnreachable => "network failure: the target server refused the connection or is unreachable",
            FailureCategory::NetworkTimeout => "network timeout: DNS resolution or connection timed out",
            FailureCategory::OutOfMemory => "out of memory",
            FailureCategory::DiskFull => "disk full: no space left on device",
            FailureCategory::FailureMarker => "case reported a failure in its output",
            FailureCategory::Unknown => "unknown failure",
        };
        write!(f, "{}", s)
    }
}

const PATTERNS: &[(FailureCategory, &[&str])] = &[
    (
        FailureCategory::MissingModule,
        &["importerror", "modulenotfounderror", "no module named"],
    ),
    (FailureCategory::PermissionDenied, &["permission denied", "access denied"]),
    (FailureCategory::MissingFile, &["no such file", "file not found"]),
    (
        FailureCategory::NetworkUnreachable,
        &["connection refused", "network is unreachable"],
    ),
    (
        FailureCategory::NetworkTimeout,
        &["connection timeout", "timed out", "dns resolution failed", "name or service not known"],
    ),
    (FailureCategory::OutOfMemory, &["out of memory", "memoryerror", "memory error"]),
    (FailureCategory::DiskFull, &["no space left", "disk space"]),
];

/// Classify a failed run from its captured log and the configured failure markers
pub fn classify(log: &str, markers: &[String]) -> FailureCategory {
    let lower = log.to_lowercase();
    for (category, needles) in PATTERNS {
        if needles.iter().any(|n| lower.contains(n)) {
            return *category;
        }
    }
    if find_marker(log, markers).is_some() {
        return FailureCategory::FailureMarker;
    }
    FailureCategory::Unknown
}

/// First configured failure marker present in `log` (case-sensitive)
pub fn find_marker<'a>(log: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .find(|m| !m.is_empty() && log.contains(m.as_str()))
        .map(|m| m.as_str())
}

/// Cut `reason` to at most `limit` characters, marking the cut with `...`
pub fn bound_reason(reason: &str, limit: usize) -> String {
    if reason.chars().count() <= limit {
        return reason.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut bounded: String = reason.chars().take(keep).collect();
    bounded.push_str("...");
    bounded
}
