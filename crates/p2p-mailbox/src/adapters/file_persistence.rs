//! JSON File Persistence Adapter
//!
//! Implements `PersistenceManager<T>` by writing `T` as JSON to a single
//! file. Writes go to a temporary sibling first and are renamed into place,
//! so a crash never leaves a half-written file behind.

use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::domain::PersistenceError;
use crate::ports::PersistenceManager;

/// JSON file store for one aggregate.
pub struct JsonFilePersistence<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFilePersistence<T> {
    /// Persist to `path`. Parent directories are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<T> PersistenceManager<T> for JsonFilePersistence<T>
where
    T: Serialize + DeserializeOwned,
{
    fn read_persisted(&self) -> Result<Option<T>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::Io(e.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))
    }

    fn request_persistence(&self, value: &T) -> Result<(), PersistenceError> {
        let json =
            serde_json::to_vec(value).map_err(|e| PersistenceError::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::Io(e.to_string()))?;
        }
        let temp = self.temp_path();
        fs::write(&temp, &json).map_err(|e| PersistenceError::Io(e.to_string()))?;
        fs::rename(&temp, &self.path).map_err(|e| PersistenceError::Io(e.to_string()))?;

        debug!(path = %self.path.display(), bytes = json.len(), "[mailbox] persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IgnoredMailboxMap;
    use shared_types::Timestamp;

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonFilePersistence<IgnoredMailboxMap> =
            JsonFilePersistence::new(dir.path().join("absent.json"));
        assert_eq!(store.read_persisted().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("nested/ignored.json"));

        let mut map = IgnoredMailboxMap::new();
        map.ignore("m1", Timestamp::from_millis(7));
        store.request_persistence(&map).unwrap();

        assert_eq!(store.read_persisted().unwrap(), Some(map));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ignored.json");
        fs::write(&path, b"{not json").unwrap();

        let store: JsonFilePersistence<IgnoredMailboxMap> = JsonFilePersistence::new(path);
        assert!(matches!(
            store.read_persisted(),
            Err(PersistenceError::Serialization(_))
        ));
    }
}
