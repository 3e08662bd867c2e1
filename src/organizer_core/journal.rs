//! Record of every copy/move performed, for later review or rollback tooling.

use crate::organizer_core::config::TransferMode;
use crate::organizer_core::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub operation: TransferMode,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl JournalEntry {
    pub fn now(source: &Path, destination: &Path, operation: TransferMode) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            operation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

pub trait OperationJournal: Send {
    fn record(&mut self, entry: &JournalEntry) -> Result<()>;
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

impl OperationJournal for NullJournal {
    fn record(&mut self, _entry: &JournalEntry) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonLinesJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every entry of a journal file.
    pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

impl OperationJournal for JsonLinesJournal {
    fn record(&mut self, entry: &JournalEntry) -> Result<()> {
        serde_json::to_writer(&mut self.writer, entry)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn test_json_lines_append() {
        let temp = TempDir::new().unwrap();
        let path = temp.child("journal.jsonl");

        let first = JournalEntry::now(Path::new("/in/a.jpg"), Path::new("/out/a.jpg"), TransferMode::Copy);
        let second = JournalEntry::now(Path::new("/in/b.jpg"), Path::new("/out/b.jpg"), TransferMode::Move);
        {
            let mut journal = JsonLinesJournal::open(path.path()).unwrap();
            journal.record(&first).unwrap();
        }
        {
            let mut journal = JsonLinesJournal::open(path.path()).unwrap();
            journal.record(&second).unwrap();
        }

        let entries = JsonLinesJournal::read_entries(path.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, PathBuf::from("/in/a.jpg"));
        assert_eq!(entries[1].operation, TransferMode::Move);
        path.assert(predicates::str::contains("\"operation\":\"move\""));
    }
}
