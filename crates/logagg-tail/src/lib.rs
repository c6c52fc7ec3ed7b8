//! logagg-tail: filesystem IO boundary.
//! Discovers source files, tails them, and appends aggregate output.
//! No dedup logic here; that is `logagg-core`.

pub mod discovery;
pub mod error;
pub mod tailer;
pub mod writer;

pub use discovery::{DiscoveredFile, discover, is_aggregate_output};
pub use error::TailError;
pub use tailer::{TailCursor, Tailer};
pub use writer::{AggregateWriter, aggregate_path_for};
