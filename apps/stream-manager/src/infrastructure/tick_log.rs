//! Ticker Log Sink
//!
//! Appends every trade received on a ticker stream to a file, one JSON
//! object per line.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::domain::streaming::TradeTick;

/// Append-only JSON lines log of trades.
#[derive(Debug)]
pub struct TickLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl TickLog {
    /// Open `path` for appending, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one trade and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append(&self, tick: &TradeTick) -> io::Result<()> {
        let line = serde_json::to_string(tick)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}
