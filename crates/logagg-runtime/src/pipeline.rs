//! Per-file bundle: tailer → parser → dedup cache → aggregate writer.
//!
//! All methods here do blocking file IO; callers run them on the blocking
//! pool. The tailer mutex serializes ingestion of one file; the aggregate
//! mutex is shared between ingestion, pruning and teardown so that each
//! record is removed and written under a single lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use logagg_core::{AggregationRecord, DedupCache, LineParser};
use logagg_tail::{AggregateWriter, DiscoveredFile, TailCursor, TailError, Tailer};

/// Cache parameters shared by every pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window: TimeDelta,
    pub max_entries: usize,
    pub output_suffix: String,
}

/// Where a new pipeline begins reading its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Skip existing content.
    End,
    Start,
    /// Pick up where a retired pipeline for the same path stopped.
    Resume(TailCursor),
}

/// Outcome of one ingestion pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: usize,
    pub flushed: usize,
    pub write_errors: usize,
}

struct FileAggregate {
    cache: DedupCache,
    writer: AggregateWriter,
}

impl FileAggregate {
    /// Write one record that has already left the cache. A failed write is
    /// logged with the line itself so the record is not lost silently.
    fn emit(&mut self, record: &AggregationRecord) -> bool {
        match self.writer.write_record(record) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    output = %self.writer.path().display(),
                    error = %e,
                    record = %record.render(),
                    "failed to write aggregate record"
                );
                false
            }
        }
    }

    fn emit_all(&mut self, records: &[AggregationRecord]) -> usize {
        records.iter().filter(|r| self.emit(r)).count()
    }
}

pub struct FilePipeline {
    source: Arc<Path>,
    pattern: String,
    parser: Arc<LineParser>,
    tailer: Mutex<Tailer>,
    aggregate: Mutex<FileAggregate>,
    /// Consecutive failed reads, for log throttling.
    read_failures: AtomicU32,
}

impl FilePipeline {
    /// Open the aggregate output and set up a tailer for `file`.
    ///
    pub fn open(
        file: &DiscoveredFile,
        settings: &PipelineSettings,
        parser: Arc<LineParser>,
        start: StartAt,
    ) -> Result<Self, TailError> {
        let writer = AggregateWriter::open(&file.path, &settings.output_suffix)?;
        let source: Arc<Path> = Arc::from(file.path.as_path());
        let tailer = match start {
            StartAt::End => Tailer::from_end(file.path.clone()),
            StartAt::Start => Tailer::from_start(file.path.clone()),
            StartAt::Resume(cursor) => Tailer::resume(file.path.clone(), cursor),
        };

        Ok(Self {
            source: Arc::clone(&source),
            pattern: file.pattern.clone(),
            parser,
            tailer: Mutex::new(tailer),
            aggregate: Mutex::new(FileAggregate {
                cache: DedupCache::new(source, settings.window, settings.max_entries),
                writer,
            }),
            read_failures: AtomicU32::new(0),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn output_path(&self) -> PathBuf {
        lock(&self.aggregate).writer.path().to_path_buf()
    }

    /// Read position to carry over if this path is matched again later.
    pub fn cursor(&self) -> TailCursor {
        lock(&self.tailer).cursor()
    }

    /// Number of live records.
    pub fn cached(&self) -> usize {
        lock(&self.aggregate).cache.len()
    }

    /// Read appended lines and fold them into the cache, writing whatever
    /// the cache flushes. Every line read in this pass is stamped `now`.
    pub fn ingest(&self, now: DateTime<Utc>) -> Result<IngestStats, TailError> {
        let mut tailer = lock(&self.tailer);
        let lines = match tailer.poll_lines() {
            Ok(lines) => {
                let failures = self.read_failures.swap(0, Ordering::Relaxed);
                if failures > 0 {
                    tracing::info!(
                        path = %self.source.display(),
                        failures,
                        "source readable again"
                    );
                }
                lines
            }
            Err(e) => {
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut stats = IngestStats {
            lines: lines.len(),
            ..IngestStats::default()
        };
        if lines.is_empty() {
            return Ok(stats);
        }

        let mut aggregate = lock(&self.aggregate);
        for line in &lines {
            let Some(entry) = self.parser.parse(line, now) else {
                continue;
            };
            if let Some(record) = aggregate.cache.observe(&entry) {
                if aggregate.emit(&record) {
                    stats.flushed += 1;
                } else {
                    stats.write_errors += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Flush and evict records not seen for longer than the window.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut aggregate = lock(&self.aggregate);
        let stale = aggregate.cache.evict_stale(now);
        if stale.is_empty() {
            return 0;
        }
        let written = aggregate.emit_all(&stale);
        tracing::debug!(
            path = %self.source.display(),
            evicted = stale.len(),
            written,
            "pruned stale records"
        );
        stale.len()
    }

    /// Flush every live record. Used when the source vanishes and on shutdown.
    pub fn flush_all(&self) -> usize {
        let mut aggregate = lock(&self.aggregate);
        let records = aggregate.cache.drain();
        aggregate.emit_all(&records);
        records.len()
    }

    /// Consecutive failed reads so far (0 after a successful read).
    pub fn read_failures(&self) -> u32 {
        self.read_failures.load(Ordering::Relaxed)
    }
}

/// A panic while holding the lock leaves the data usable; keep going.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
