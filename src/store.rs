//! Append-only record log on disk.
//!
//! One file shared by every connection for the lifetime of the process.
//! Records are only ever appended; the file is read back from the start
//! for every echo and removed once, at orderly shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// The shared log file.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    /// Sync file data after each append
    sync: bool,
    /// Append handle, opened on first use
    file: Option<File>,
}

impl LogStore {
    /// Create a store backed by `path`. Nothing is opened until the first append.
    pub fn new(path: impl Into<PathBuf>, sync: bool) -> Self {
        Self {
            path: path.into(),
            sync,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record's raw bytes to the end of the log.
    pub fn append(&mut self, record: &[u8]) -> io::Result<()> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                debug!(path = %self.path.display(), "Opened log store");
                file
            }
        };
        let file = self.file.insert(file);

        file.write_all(record)?;
        if self.sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Copy the entire current log to `writer`, returning the bytes copied.
    pub fn stream_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let mut file = File::open(&self.path)?;
        io::copy(&mut file, writer)
    }

    /// Read the entire current log into memory.
    #[cfg(test)]
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// Current size of the log in bytes.
    pub fn len(&self) -> io::Result<u64> {
        fs::metadata(&self.path).map(|m| m.len())
    }

    /// Close the append handle and delete the backing file.
    ///
    /// Failures are logged, never returned.
    pub fn remove(&mut self) {
        self.file = None;

        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed log store"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Log store was never created")
            }
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to remove log store"),
        }
    }
}
