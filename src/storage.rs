//! Storage collaborator boundary.
//!
//! The pipeline treats storage as an opaque blob store keyed by relative
//! path: it reads source bytes, writes rendition bytes, deletes renditions
//! on cleanup, and maps paths to URLs. It never lists directories and never
//! probes for existence; rendition presence is a lifecycle invariant, not
//! something checked per read.
//!
//! No retry policy lives here or in the driver; a storage that wants
//! retries implements them behind this trait.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("no such file: {0}")]
    NotFound(String),
}

/// Blob store keyed by storage-relative path.
pub trait Storage {
    /// Read a file's bytes.
    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Write bytes, creating parents as needed. Returns the stored path.
    fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Remove a file. Deleting a missing file is not an error.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Public URL for a stored path.
    fn url(&self, path: &str) -> String;
}

/// Local-filesystem storage rooted at a directory.
pub struct FileStorage {
    root: PathBuf,
    base_url: String,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Storage for FileStorage {
    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        std::fs::read(self.full_path(path)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path.to_owned()),
            _ => StorageError::Io(e),
        })
    }

    fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, data)?;
        Ok(path.to_owned())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.full_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// In-memory storage for tests and harnesses.
///
/// Guarded by a Mutex (not RefCell) so the type is Sync and usable from
/// multi-threaded test drivers.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            base_url: "/media/".to_owned(),
        }
    }

    /// Seed a file, e.g. a source image a test will process.
    pub fn put(&self, path: impl Into<String>, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.into(), data);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    /// All stored paths under a prefix, sorted. Test helper.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        paths
    }
}

impl Storage for MemoryStorage {
    fn open(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_owned()))
    }

    fn save(&self, path: &str, data: &[u8]) -> Result<String, StorageError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_owned(), data.to_vec());
        Ok(path.to_owned())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
