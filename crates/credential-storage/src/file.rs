//! File-backed storage backend.
//!
//! All entries live in one JSON object on disk. Every read goes to the file,
//! so values written by another process are picked up. Writes go through a
//! sibling temp file and a rename, so a crash never leaves a torn file.

use crate::{DurableStorage, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

type Entries = BTreeMap<String, String>;

/// Durable storage persisted as a JSON file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Open (or lazily create) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StorageError::Encoding(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), entries = entries.len(), "credential store written");
        Ok(())
    }
}

impl DurableStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock();
        let mut entries = self.read_entries()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write_entries(&entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("store.json")).unwrap();

        assert_eq!(storage.get("anything").unwrap(), None);
        assert!(!storage.delete("anything").unwrap());
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let storage = FileStorage::new(&path).unwrap();
        storage.set("sessionIdForConvex", "sess-1").unwrap();
        storage.set("other", "value").unwrap();
        drop(storage);

        let reopened = FileStorage::new(&path).unwrap();
        assert_eq!(
            reopened.get("sessionIdForConvex").unwrap(),
            Some("sess-1".to_string())
        );
        assert!(reopened.has("other").unwrap());
    }

    #[test]
    fn test_writes_from_second_handle_are_visible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let first = FileStorage::new(&path).unwrap();
        let second = FileStorage::new(&path).unwrap();

        first.set("k", "v1").unwrap();
        second.set("k", "v2").unwrap();
        assert_eq!(first.get("k").unwrap(), Some("v2".to_string()));

        assert!(first.delete("k").unwrap());
        assert_eq!(second.get("k").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_encoding_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        let storage = FileStorage::new(&path).unwrap();
        assert!(matches!(storage.get("k"), Err(StorageError::Encoding(_))));
    }
}
