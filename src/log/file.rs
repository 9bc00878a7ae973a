//! Durable JSON-lines event log.
//!
//! One line per record. An entry line carries its idempotency key, so the
//! entry and the key mark land in a single write followed by `sync_data`.
//! A torn trailing line from a crash mid-write is discarded on open; a bad
//! line anywhere else is corruption and refuses to open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::game::ids::{IdempotencyKey, SceneId};
use crate::log::index::LogIndex;
use crate::log::{EventLog, EventLogEntry, LogError, LogHead};

/// Stored line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LogLine {
    Entry(EventLogEntry),
    Processed { scene_id: SceneId, key: IdempotencyKey },
}

#[derive(Debug)]
struct Inner {
    file: File,
    len: u64,
    index: LogIndex,
}

/// Append-only file-backed log.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileEventLog {
    /// Open or create the log at `path`, rebuilding the index from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut index = LogIndex::default();
        let mut good = 0usize;
        for (n, raw) in buf.split_inclusive(|b| *b == b'\n').enumerate() {
            let complete = raw.ends_with(b"\n");
            let body = raw.strip_suffix(b"\n").unwrap_or(raw);
            if body.iter().all(u8::is_ascii_whitespace) {
                if complete {
                    good += raw.len();
                }
                continue;
            }
            if !complete {
                warn!(path = %path.display(), bytes = raw.len(), "discarding torn trailing line");
                break;
            }

            let line: LogLine = serde_json::from_slice(body).map_err(|e| LogError::Corrupt {
                line: n + 1,
                reason: e.to_string(),
            })?;
            match line {
                LogLine::Entry(entry) => {
                    index.check(&entry)?;
                    index.commit(entry);
                }
                LogLine::Processed { scene_id, key } => {
                    index.mark(&scene_id, &key);
                }
            }
            good += raw.len();
        }

        if good < buf.len() {
            file.set_len(good as u64)?;
            file.sync_data()?;
        }

        info!(path = %path.display(), entries = index.len(), "event log opened");
        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                len: good as u64,
                index,
            }),
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    /// Write one line durably, rolling the file back on failure.
    fn write_line(&mut self, line: &LogLine) -> Result<(), LogError> {
        let mut bytes = serde_json::to_vec(line)?;
        bytes.push(b'\n');

        let written = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            // Leave no partial line behind for the next append.
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(error = %rollback, "failed to truncate after write error");
            }
            return Err(e.into());
        }
        self.len += bytes.len() as u64;
        Ok(())
    }
}

impl EventLog for FileEventLog {
    fn has_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError> {
        Ok(self.lock().index.has_processed(scene, key))
    }

    fn mark_processed(&self, scene: &SceneId, key: &IdempotencyKey) -> Result<bool, LogError> {
        let mut inner = self.lock();
        if inner.index.has_processed(scene, key) {
            return Ok(false);
        }
        inner.write_line(&LogLine::Processed {
            scene_id: scene.clone(),
            key: key.clone(),
        })?;
        Ok(inner.index.mark(scene, key))
    }

    fn append(&self, entry: &EventLogEntry) -> Result<(), LogError> {
        let mut inner = self.lock();
        inner.index.check(entry)?;
        inner.write_line(&LogLine::Entry(entry.clone()))?;
        inner.index.commit(entry.clone());
        debug!(scene = %entry.scene_id, sequence = entry.sequence, "entry persisted");
        Ok(())
    }

    fn all(&self) -> Result<Vec<EventLogEntry>, LogError> {
        Ok(self.lock().index.all())
    }

    fn for_scene(&self, scene: &SceneId) -> Result<Vec<EventLogEntry>, LogError> {
        Ok(self.lock().index.for_scene(scene))
    }

    fn head(&self, scene: &SceneId) -> Result<LogHead, LogError> {
        Ok(self.lock().index.head(scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::entry::fixtures::entry;
    use tempfile::TempDir;

    fn log_path(dir: &TempDir) -> PathBuf {
        dir.path().join("events.jsonl")
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(log_path(&dir)).unwrap();
            log.append(&entry("a", 0, Some("k1"))).unwrap();
            log.append(&entry("a", 1, None)).unwrap();
            log.mark_processed(&SceneId::from("a"), &IdempotencyKey::from("imported"))
                .unwrap();
        }

        let log = FileEventLog::open(log_path(&dir)).unwrap();
        let entries = log.for_scene(&SceneId::from("a")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], entry("a", 1, None));

        let scene = SceneId::from("a");
        assert!(log.has_processed(&scene, &IdempotencyKey::from("k1")).unwrap());
        assert!(log.has_processed(&scene, &IdempotencyKey::from("imported")).unwrap());
        assert_eq!(log.head(&scene).unwrap().next_sequence, 2);
    }

    #[test]
    fn test_duplicate_key_not_written() {
        let dir = TempDir::new().unwrap();
        let log = FileEventLog::open(log_path(&dir)).unwrap();
        log.append(&entry("a", 0, Some("k1"))).unwrap();
        assert!(log.append(&entry("a", 1, Some("k1"))).is_err());

        let text = std::fs::read_to_string(log_path(&dir)).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileEventLog::open(log_path(&dir)).unwrap();
            log.append(&entry("a", 0, None)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(log_path(&dir)).unwrap();
        file.write_all(br#"{"entry":{"id":"trunc"#).unwrap();
        drop(file);

        let log = FileEventLog::open(log_path(&dir)).unwrap();
        assert_eq!(log.all().unwrap().len(), 1);
        log.append(&entry("a", 1, None)).unwrap();

        let reopened = FileEventLog::open(log_path(&dir)).unwrap();
        assert_eq!(reopened.all().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_refuses_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(log_path(&dir), "not json\n").unwrap();
        let err = FileEventLog::open(log_path(&dir)).unwrap_err();
        assert!(matches!(err, LogError::Corrupt { line: 1, .. }));
    }
}
