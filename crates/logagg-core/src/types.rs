use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Timestamp layout used for the time range of a rendered record.
pub const OUTPUT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

// ─── Level ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    /// Line did not carry a recognizable level token.
    Unknown,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Match a level token case-insensitively, including the common aliases
    /// `WARNING`, `ERR`, `CRITICAL` and `PANIC`. Never yields `Unknown`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" | "NOTICE" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" | "ERR" => Some(Self::Error),
            "FATAL" | "CRITICAL" | "PANIC" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Parsed entry ─────────────────────────────────────────────────

/// One classified log line. Produced per line and consumed immediately by
/// the dedup cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub level: Level,
    /// Canonical form used for keying.
    pub message: String,
    /// The line as read, without its terminator.
    pub raw: String,
    /// Wall-clock time the line was read. Drives windowing.
    pub observed_at: DateTime<Utc>,
    /// Timestamp embedded in a `[...]` prefix, if one parsed.
    pub source_time: Option<NaiveDateTime>,
}

// ─── Aggregation ──────────────────────────────────────────────────

/// Identity of a group of duplicate lines within one source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub source: Arc<Path>,
    pub level: Level,
    pub message: String,
}

impl AggregationKey {
    pub fn for_entry(source: &Arc<Path>, entry: &ParsedEntry) -> Self {
        Self {
            source: Arc::clone(source),
            level: entry.level,
            message: entry.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRecord {
    pub key: AggregationKey,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Representative raw line (the first occurrence).
    pub sample: String,
}

impl AggregationRecord {
    pub fn open(key: AggregationKey, entry: &ParsedEntry) -> Self {
        Self {
            key,
            count: 1,
            first_seen: entry.observed_at,
            last_seen: entry.observed_at,
            sample: entry.raw.clone(),
        }
    }

    /// Count one more occurrence. `last_seen` never moves backwards, so a
    /// clock step does not break `first_seen <= last_seen`.
    pub fn bump(&mut self, at: DateTime<Utc>) {
        self.count = self.count.saturating_add(1);
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    /// Output line for the aggregate file, without a trailing newline.
    ///
    /// `[<first> .. <last>] <sample> (occurred N times)`
    pub fn render(&self) -> String {
        let noun = if self.count == 1 { "time" } else { "times" };
        format!(
            "[{} .. {}] {} (occurred {} {noun})",
            self.first_seen.format(OUTPUT_TIME_FORMAT),
            self.last_seen.format(OUTPUT_TIME_FORMAT),
            self.sample.trim(),
            self.count,
        )
    }
}
