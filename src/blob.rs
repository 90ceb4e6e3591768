//! Storage for generated images.

use crate::error::MapError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use uuid::Uuid;

/// Storage for generated images, addressed by relative keys such as
/// `maps/<map>/layers/<layer>.png`.
pub trait BlobStore: Send + Sync {
    /// Writes the whole blob; readers never observe a partial write.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), MapError>;
    /// The whole blob; `NotFound` when absent.
    fn read(&self, key: &str) -> Result<Vec<u8>, MapError>;
    /// Whether the blob exists.
    fn exists(&self, key: &str) -> bool;
    /// Last modification time, `None` when the blob does not exist.
    fn modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, MapError>;
    /// Removes the blob; deleting a missing blob is not an error.
    fn delete(&self, key: &str) -> Result<(), MapError>;
}

/// Filesystem-backed [`BlobStore`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Stores blobs under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    /// Directory the keys are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a key.
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), MapError> {
        let path = self.path_of(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| MapError::io(dir, e))?;
        }
        // Write atomically via temp file
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = path.with_file_name(tmp_name);
        if let Err(e) = write_stamped(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(MapError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(MapError::io(&path, e));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, MapError> {
        let path = self.path_of(key);
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MapError::not_found("file", path.display()),
            _ => MapError::io(&path, e),
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.path_of(key).is_file()
    }

    fn modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, MapError> {
        let path = self.path_of(key);
        match fs::metadata(&path) {
            Ok(meta) => {
                let mtime = meta.modified().map_err(|e| MapError::io(&path, e))?;
                Ok(Some(DateTime::<Utc>::from(mtime)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MapError::io(&path, e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), MapError> {
        let path = self.path_of(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MapError::io(&path, e)),
        }
    }
}

/// Writes `bytes` and stamps the file with the precise current time; the
/// filesystem's own mtime comes from a coarser clock and can trail `Utc::now()`.
fn write_stamped(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.set_modified(SystemTime::now())?;
    file.sync_all()
}

/// In-process [`BlobStore`]; modification time is the time of the last write.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBlobStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, DateTime<Utc>)>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overrides a blob's modification time.
    pub fn set_modified(&self, key: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.lock().get_mut(key) {
            entry.1 = at;
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), MapError> {
        self.lock()
            .insert(key.to_string(), (bytes.to_vec(), Utc::now()));
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, MapError> {
        self.lock()
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| MapError::not_found("file", key))
    }

    fn exists(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, MapError> {
        Ok(self.lock().get(key).map(|(_, at)| *at))
    }

    fn delete(&self, key: &str) -> Result<(), MapError> {
        self.lock().remove(key);
        Ok(())
    }
}
