//! File-backed persistence for small state blobs
//!
//! Both persisted values (the scanner cursor and the pending-payment map) are
//! rewritten in full on every change; writes go through a temporary file in
//! the same directory and an atomic rename so a crash never leaves a torn
//! blob behind.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

pub struct FilePersist {
    path: PathBuf,
    lock: Mutex<()>,
}

// === impl FilePersist ===

impl FilePersist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serializes `value` and atomically replaces the backing file
    pub fn write<T: Serialize + ?Sized>(&self, value: &T) -> io::Result<()> {
        let _guard = self.lock.lock();
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(file.as_file(), value)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Reads the backing file back into a value
    pub fn read<T: DeserializeOwned>(&self) -> io::Result<T> {
        let _guard = self.lock.lock();
        let bytes = fs::read(&self.path)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}
