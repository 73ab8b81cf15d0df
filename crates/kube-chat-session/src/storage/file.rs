//! File-backed durable store: one JSON document per key.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use kube_chat_core::{ChangeFeed, DurableStore, StoreError};
use tempfile::NamedTempFile;

use super::ChangeHub;

/// Store keeping each key in `<dir>/<key>.json`.
///
/// Writes go to a temporary file in the same directory and are renamed over
/// the target, so readers never see a partial document.
pub struct FileStore {
    dir: Arc<PathBuf>,
    hub: Arc<ChangeHub>,
    origin: u64,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "Opened file store");
        let hub = Arc::new(ChangeHub::new());
        let origin = hub.register();
        Ok(Self {
            dir: Arc::new(dir),
            hub,
            origin,
        })
    }

    /// Open another handle onto the same directory.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            dir: Arc::clone(&self.dir),
            hub: Arc::clone(&self.hub),
            origin: self.hub.register(),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let mut tmp = NamedTempFile::new_in(self.dir.as_path())?;
        tmp.write_all(value.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        self.hub.notify(key, self.origin);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => {
                self.hub.notify(key, self.origin);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&self) -> ChangeFeed {
        self.hub.subscribe(self.origin)
    }
}
