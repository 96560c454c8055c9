use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

use super::record::LoggedDecision;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open decision log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to append to decision log {path} after {attempts} attempt(s): {source}")]
    Append {
        path: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to read decision log {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Append-only decision log
///
/// Every row goes out as a single `write_all` under the lock, so rows from
/// concurrent callers never interleave. A failed write is rolled back to the
/// row's start offset, the handle is dropped and the next attempt reopens
/// the file.
pub struct DecisionLog {
    path: PathBuf,
    handle: Mutex<LogHandle<File>>,
    max_attempts: u32,
}

impl DecisionLog {
    pub fn open(path: &Path, max_attempts: u32) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::Open {
                path: path.display().to_string(),
                source,
            })?;
        }

        let file = open_append(path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(LogHandle::new(file)),
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, retrying a bounded number of times
    pub fn append(&self, decision: &LoggedDecision) -> Result<(), StorageError> {
        let mut line = decision.to_csv_line();
        line.push('\n');

        let mut handle = self.handle.lock();
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match handle.write_row(line.as_bytes(), || open_append(&self.path)) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "Decision log write failed (attempt {}/{}): {}",
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(StorageError::Append {
            path: self.path.display().to_string(),
            attempts: self.max_attempts,
            source: last_error.unwrap_or_else(|| io::Error::other("no write attempted")),
        })
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

// ============================================================================
// ROW SINK
// ============================================================================

/// Append target that can undo a partial row
pub(super) trait RowSink: Write {
    /// Current end offset
    fn end(&mut self) -> io::Result<u64>;

    /// Drop everything past `len`
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl RowSink for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

pub(super) struct LogHandle<S> {
    sink: Option<S>,
    /// A failed row could not be rolled back and has no terminator yet
    torn: bool,
}

impl<S: RowSink> LogHandle<S> {
    pub(super) fn new(sink: S) -> Self {
        Self {
            sink: Some(sink),
            torn: false,
        }
    }

    /// Write one complete row or leave the sink as it was
    ///
    /// When a partial row cannot be truncated away, the next row is preceded
    /// by a newline so the fragment stays on a line of its own.
    pub(super) fn write_row<F>(&mut self, bytes: &[u8], reopen: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<S>,
    {
        if self.sink.is_none() {
            self.sink = Some(reopen()?);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(io::Error::other("decision log handle unavailable"));
        };

        let start = sink.end()?;
        let fence: &[u8] = if self.torn { b"\n" } else { b"" };
        match write_fenced(sink, fence, bytes) {
            Ok(()) => {
                self.torn = false;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = sink.truncate_to(start) {
                    log::warn!("Cannot roll back partial decision row: {}", rollback);
                    self.torn = true;
                }
                self.sink = None;
                Err(e)
            }
        }
    }
}

fn write_fenced<W: Write>(sink: &mut W, fence: &[u8], bytes: &[u8]) -> io::Result<()> {
    sink.write_all(fence)?;
    sink.write_all(bytes)?;
    sink.flush()
}
