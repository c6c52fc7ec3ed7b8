//! logagg-core: parsing and windowed deduplication of log lines.
//! No tailing or writing here; that lives in `logagg-tail` and the runtime.

pub mod cache;
pub mod config;
pub mod parser;
pub mod types;

pub use cache::DedupCache;
pub use config::{Config, ConfigError, MaskConfig};
pub use parser::{Canonicalizer, LineParser, MaskRule, MaskingCanonicalizer, TrimCanonicalizer};
pub use types::{AggregationKey, AggregationRecord, Level, ParsedEntry};
