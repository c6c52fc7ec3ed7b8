//! Append-only writer for a source file's aggregate output.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use logagg_core::AggregationRecord;

use crate::error::TailError;

/// `service.log` → `service<suffix>.log`, in the same directory.
pub fn aggregate_path_for(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    source.with_file_name(name)
}

/// Unbuffered: every record reaches the OS before `write_record` returns,
/// so a shipper tailing the output sees it right away.
#[derive(Debug)]
pub struct AggregateWriter {
    path: PathBuf,
    file: File,
}

impl AggregateWriter {
    /// Open (or create) the aggregate file for `source`. Existing content is
    /// kept.
    pub fn open(source: &Path, suffix: &str) -> Result<Self, TailError> {
        let path = aggregate_path_for(source, suffix);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TailError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_record(&mut self, record: &AggregationRecord) -> Result<(), TailError> {
        let mut line = record.render();
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| TailError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
