//! Incremental reader for one growing log file.
//!
//! Tracks a byte offset, holds back a partial trailing line, and detects
//! truncation or replacement (size below offset, or inode change).

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::TailError;

/// Upper bound on bytes consumed per poll; the rest is picked up next tick.
pub const MAX_READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// A held-back fragment longer than this is emitted as a line of its own.
pub const MAX_PARTIAL_LINE_BYTES: usize = 1024 * 1024;

/// Where a retired tailer stopped: the start of its first unconsumed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailCursor {
    pub offset: u64,
    pub inode: u64,
}

#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    /// Byte offset of the next unread byte.
    offset: u64,
    /// Inode of the file last read (0 when unknown or not on unix).
    inode: u64,
    /// File size observed on the last poll.
    last_size: u64,
    /// Bytes after the last newline, waiting for their terminator.
    partial: Vec<u8>,
}

impl Tailer {
    /// Start at the current end of file, skipping existing content.
    pub fn from_end(path: PathBuf) -> Self {
        let (size, inode) = file_identity(&path).unwrap_or((0, 0));
        Self {
            path,
            offset: size,
            inode,
            last_size: size,
            partial: Vec::new(),
        }
    }

    /// Start at offset 0 so existing content is read on the first poll.
    pub fn from_start(path: PathBuf) -> Self {
        let inode = file_identity(&path).map(|(_, ino)| ino).unwrap_or(0);
        Self {
            path,
            offset: 0,
            inode,
            last_size: 0,
            partial: Vec::new(),
        }
    }

    /// Continue from `cursor` if the file at `path` is still the one it was
    /// taken from and has not shrunk below it; otherwise start at offset 0.
    pub fn resume(path: PathBuf, cursor: TailCursor) -> Self {
        let Some((size, inode)) = file_identity(&path) else {
            return Self::from_start(path);
        };
        let same_file = cursor.inode == 0 || inode == 0 || cursor.inode == inode;
        if !same_file || size < cursor.offset {
            info!(path = %path.display(), "file changed while unwatched, reading from start");
            return Self::from_start(path);
        }
        Self {
            path,
            offset: cursor.offset,
            inode,
            last_size: size,
            partial: Vec::new(),
        }
    }

    /// Position to hand to [`Tailer::resume`]. Held-back bytes are not
    /// counted as consumed, so a half-written line is read again in full.
    pub fn cursor(&self) -> TailCursor {
        TailCursor {
            offset: self.offset - self.partial.len() as u64,
            inode: self.inode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    /// Read complete lines appended since the last poll.
    ///
    /// Lines come back without their `\n` / `\r\n` terminator; invalid UTF-8
    /// is replaced lossily. Empty lines are skipped.
    pub fn poll_lines(&mut self) -> Result<Vec<String>, TailError> {
        let mut file = File::open(&self.path).map_err(|source| TailError::Open {
            path: self.path.clone(),
            source,
        })?;
        let meta = file.metadata().map_err(|source| TailError::Read {
            path: self.path.clone(),
            source,
        })?;
        let size = meta.len();
        let inode = inode_of(&meta);

        if self.inode != 0 && inode != 0 && inode != self.inode {
            info!(path = %self.path.display(), "file replaced, reading from start");
            self.rewind();
        } else if size < self.offset {
            info!(
                path = %self.path.display(),
                previous_offset = self.offset,
                current_size = size,
                "file truncated, reading from start"
            );
            self.rewind();
        }
        self.inode = inode;
        self.last_size = size;

        if size == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|source| TailError::Read {
                path: self.path.clone(),
                source,
            })?;
        let mut buf = Vec::new();
        let read = file
            .take(MAX_READ_CHUNK_BYTES)
            .read_to_end(&mut buf)
            .map_err(|source| TailError::Read {
                path: self.path.clone(),
                source,
            })?;
        self.offset += read as u64;

        let lines = self.split_lines(&buf);
        debug!(
            path = %self.path.display(),
            bytes = read,
            lines = lines.len(),
            offset = self.offset,
            "read appended bytes"
        );
        Ok(lines)
    }

    fn rewind(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }

    fn split_lines(&mut self, buf: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(buf);
        let mut lines: Vec<String> = match self.partial.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => {
                let rest = self.partial.split_off(last_newline + 1);
                let complete = std::mem::replace(&mut self.partial, rest);
                complete
                    .split(|&b| b == b'\n')
                    .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
                    .filter(|line| !line.is_empty())
                    .map(|line| String::from_utf8_lossy(line).into_owned())
                    .collect()
            }
            None => Vec::new(),
        };

        if self.partial.len() > MAX_PARTIAL_LINE_BYTES {
            warn!(
                path = %self.path.display(),
                bytes = self.partial.len(),
                "no line terminator within limit, emitting fragment as a line"
            );
            let fragment = std::mem::take(&mut self.partial);
            lines.push(String::from_utf8_lossy(&fragment).into_owned());
        }
        lines
    }
}

/// Size and inode for rotation detection.
fn file_identity(path: &Path) -> Option<(u64, u64)> {
    fs::metadata(path).ok().map(|m| (m.len(), inode_of(&m)))
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}
