//! Append-only JSON-lines log backing the file storage.

use crate::schema::StoredUrl;
use burrow_core::{Result, StorageError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An append-only file holding one [`StoredUrl`] JSON object per line.
///
/// Writers are expected to be serialized by the caller (the file backend
/// holds the cache's exclusive lock while appending). Each append is a single
/// `write` call so a crash leaves at most one torn line at the tail. A write
/// that fails while the process keeps running is cut off the file again, so
/// the next append starts on a clean line.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Opens the journal, creating the file and its parent directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &StoredUrl) -> Result<()> {
        self.write_raw(&encode_line(record)?)
    }

    /// Appends every record with one write.
    pub fn append_all(&self, records: &[StoredUrl]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(records.len() * 160);
        for record in records {
            buf.extend_from_slice(&encode_line(record)?);
        }
        self.write_raw(&buf)?;

        debug!(path = %self.path.display(), count = records.len(), "journal batch appended");
        Ok(())
    }

    /// Reads every record in file order.
    ///
    /// Empty lines are skipped. A malformed line without a trailing newline is
    /// a torn write: it is dropped and cut off the file. A malformed line that
    /// is newline-terminated means the file is corrupt.
    pub fn read_all(&self) -> Result<Vec<StoredUrl>> {
        let bytes = fs::read(&self.path)?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        for (index, chunk) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
            let terminated = chunk.ends_with(b"\n");
            let line = chunk.trim_ascii();

            if line.is_empty() {
                offset += chunk.len();
                continue;
            }

            match serde_json::from_slice::<StoredUrl>(line) {
                Ok(record) => {
                    records.push(record);
                    if !terminated {
                        self.write_raw(b"\n")?;
                    }
                }
                Err(err) if !terminated => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %err,
                        "dropping torn journal tail"
                    );
                    self.file.set_len(offset as u64)?;
                }
                Err(err) => {
                    return Err(StorageError::InvalidData(format!(
                        "{} line {}: {err}",
                        self.path.display(),
                        index + 1
                    )));
                }
            }

            offset += chunk.len();
        }

        Ok(records)
    }

    fn write_raw(&self, buf: &[u8]) -> Result<()> {
        self.write_with(|mut file| file.write_all(buf))
    }

    /// Runs `write` against the file and restores the previous length if it fails.
    fn write_with(&self, write: impl FnOnce(&File) -> io::Result<()>) -> Result<()> {
        let len = self.file.metadata()?.len();

        if let Err(err) = write(&self.file) {
            if let Err(truncate_err) = self.file.set_len(len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "failed to roll back partial journal write"
                );
            }
            return Err(err.into());
        }
        Ok(())
    }
}

fn encode_line(record: &StoredUrl) -> Result<Vec<u8>> {
    let mut line =
        serde_json::to_vec(record).map_err(|e| StorageError::InvalidData(e.to_string()))?;
    line.push(b'\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn stored(short_id: &str, url: &str) -> StoredUrl {
        StoredUrl {
            id: Uuid::new_v4(),
            short_id: short_id.to_string(),
            url: url.to_string(),
            user_id: Uuid::new_v4(),
            is_deleted: false,
        }
    }

    fn journal_in(dir: &TempDir) -> Journal {
        Journal::open(dir.path().join("urls.jsonl")).unwrap()
    }

    #[test]
    fn fresh_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        assert!(journal.read_all().unwrap().is_empty());
        assert!(journal.path().exists());
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(dir.path().join("nested/deeper/urls.jsonl")).unwrap();
        assert!(journal.path().exists());
    }

    #[test]
    fn appended_records_are_read_back_in_order() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let a = stored("a", "https://a.example");
        let b = stored("b", "https://b.example");
        let c = stored("c", "https://c.example");

        journal.append(&a).unwrap();
        journal.append_all(&[b.clone(), c.clone()]).unwrap();

        let reopened = journal_in(&dir);
        assert_eq!(reopened.read_all().unwrap(), vec![a, b, c]);
    }

    #[test]
    fn torn_tail_is_dropped_and_truncated() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let a = stored("a", "https://a.example");
        journal.append(&a).unwrap();
        journal.write_raw(br#"{"id":"6f1c2b3a-00"#).unwrap();

        assert_eq!(journal.read_all().unwrap(), vec![a.clone()]);

        let b = stored("b", "https://b.example");
        journal.append(&b).unwrap();
        assert_eq!(journal_in(&dir).read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let a = stored("a", "https://a.example");
        journal.append(&a).unwrap();

        let err = journal
            .write_with(|mut file| {
                file.write_all(br#"{"id":"6f1c2b3a-00"#)?;
                Err(io::Error::other("no space left on device"))
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));

        let b = stored("b", "https://b.example");
        journal.append(&b).unwrap();
        assert_eq!(journal_in(&dir).read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn complete_tail_without_newline_is_kept() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let a = stored("a", "https://a.example");
        journal.write_raw(&serde_json::to_vec(&a).unwrap()).unwrap();

        assert_eq!(journal.read_all().unwrap(), vec![a.clone()]);

        let b = stored("b", "https://b.example");
        journal.append(&b).unwrap();
        assert_eq!(journal_in(&dir).read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn corrupt_terminated_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        journal.write_raw(b"not json\n").unwrap();
        journal.append(&stored("a", "https://a.example")).unwrap();

        let err = journal.read_all().unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(msg) if msg.contains("line 1")));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let journal = journal_in(&dir);
        let a = stored("a", "https://a.example");
        journal.write_raw(b"\n\n").unwrap();
        journal.append(&a).unwrap();
        journal.write_raw(b"\n").unwrap();

        assert_eq!(journal.read_all().unwrap(), vec![a]);
    }
}
