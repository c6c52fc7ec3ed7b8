//! Log line classification.
//!
//! Accepted shape: an optional `[timestamp]` prefix, an optional level token
//! (`INFO:`, `INFO `, `[INFO]`), then the message. Anything that does not fit
//! still produces an entry with [`Level::Unknown`]; parsing never fails.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::types::{Level, ParsedEntry};

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

// ─── Canonicalization ─────────────────────────────────────────────

/// Maps a message to the string used for dedup keying.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, message: &str) -> String;
}

/// Trim surrounding whitespace; nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimCanonicalizer;

impl Canonicalizer for TrimCanonicalizer {
    fn canonicalize(&self, message: &str) -> String {
        message.trim().to_owned()
    }
}

/// A regex whose matches are replaced before keying, e.g. `\d+` → `<n>`.
#[derive(Debug, Clone)]
pub struct MaskRule {
    pattern: Regex,
    replacement: String,
}

impl MaskRule {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }
}

/// Trims, then applies each mask in order.
#[derive(Debug, Clone, Default)]
pub struct MaskingCanonicalizer {
    rules: Vec<MaskRule>,
}

impl MaskingCanonicalizer {
    pub fn new(rules: Vec<MaskRule>) -> Self {
        Self { rules }
    }
}

impl Canonicalizer for MaskingCanonicalizer {
    fn canonicalize(&self, message: &str) -> String {
        let mut out = message.trim().to_owned();
        for rule in &self.rules {
            out = rule
                .pattern
                .replace_all(&out, rule.replacement.as_str())
                .into_owned();
        }
        out
    }
}

// ─── Parser ───────────────────────────────────────────────────────

pub struct LineParser {
    canonicalizer: Box<dyn Canonicalizer>,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(Box::new(TrimCanonicalizer))
    }
}

impl LineParser {
    pub fn new(canonicalizer: Box<dyn Canonicalizer>) -> Self {
        Self { canonicalizer }
    }

    /// Parser with trim-only canonicalization when `rules` is empty.
    pub fn with_masks(rules: Vec<MaskRule>) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self::new(Box::new(MaskingCanonicalizer::new(rules)))
        }
    }

    /// Classify one raw line observed at `now`.
    ///
    /// Returns `None` only for blank lines.
    pub fn parse(&self, raw: &str, now: DateTime<Utc>) -> Option<ParsedEntry> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (source_time, rest) = split_timestamp(trimmed);
        let (level, body) = match split_level(rest) {
            Some((level, body)) => (level, body),
            None => (Level::Unknown, rest),
        };

        Some(ParsedEntry {
            level,
            message: self.canonicalizer.canonicalize(body),
            raw: raw.trim_end_matches(['\r', '\n']).to_owned(),
            observed_at: now,
            source_time,
        })
    }
}

/// Strip a leading `[timestamp]` if its contents parse as a timestamp.
fn split_timestamp(line: &str) -> (Option<NaiveDateTime>, &str) {
    let Some(inner_and_rest) = line.strip_prefix('[') else {
        return (None, line);
    };
    let Some(end) = inner_and_rest.find(']') else {
        return (None, line);
    };
    match parse_timestamp(inner_and_rest[..end].trim()) {
        Some(ts) => (Some(ts), inner_and_rest[end + 1..].trim_start()),
        None => (None, line),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Split a leading level token off `rest`: `[LEVEL] msg`, `LEVEL: msg` or
/// `LEVEL msg`. A bare `LEVEL` with no message also counts.
fn split_level(rest: &str) -> Option<(Level, &str)> {
    if let Some(inner_and_rest) = rest.strip_prefix('[') {
        let end = inner_and_rest.find(']')?;
        let level = Level::from_token(inner_and_rest[..end].trim())?;
        let body = inner_and_rest[end + 1..].trim_start();
        return Some((level, body.strip_prefix(':').unwrap_or(body).trim_start()));
    }

    let token_end = rest
        .find(|c: char| c == ':' || c.is_whitespace())
        .unwrap_or(rest.len());
    let level = Level::from_token(&rest[..token_end])?;
    let after = &rest[token_end..];
    let body = after.strip_prefix(':').unwrap_or(after).trim_start();
    Some((level, body))
}
