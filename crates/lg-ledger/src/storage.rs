//! Durable storage for hotset version rows
//!
//! The ledger keeps the whole (bounded) table in memory and hands every
//! committed state to a [`LedgerStorage`] backend before making it visible.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::ledger::HotsetVersion;

/// Error type for storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Corrupt ledger file '{path}': {message}")]
    Format { path: String, message: String },
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for the version table.
pub trait LedgerStorage: Send + Sync {
    /// All stored rows, any order.
    fn load(&self) -> Result<Vec<HotsetVersion>, StorageError>;
    /// Replace the stored table. Must be all-or-nothing.
    fn save(&self, rows: &[HotsetVersion]) -> Result<(), StorageError>;
}

// =============================================================================
// JSON file
// =============================================================================

/// Whole table as one JSON array, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: impl std::fmt::Display) -> StorageError {
        StorageError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl LedgerStorage for JsonFileStorage {
    fn load(&self) -> Result<Vec<HotsetVersion>, StorageError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&text).map_err(|e| StorageError::Format {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn save(&self, rows: &[HotsetVersion]) -> Result<(), StorageError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(rows).map_err(|e| self.io_error(e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Volatile backend for tests and embedding. Saves can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    rows: Mutex<Vec<HotsetVersion>>,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail until reset.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved_rows(&self) -> Vec<HotsetVersion> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl LedgerStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<HotsetVersion>, StorageError> {
        Ok(self.saved_rows())
    }

    fn save(&self, rows: &[HotsetVersion]) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("save disabled".to_string()));
        }
        *self.rows.lock().unwrap_or_else(PoisonError::into_inner) = rows.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(version: u64) -> HotsetVersion {
        HotsetVersion::head(version, vec!["a.com".into()], vec![], 0)
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("nested").join("ledger.json"));
        assert!(storage.load().unwrap().is_empty());

        storage.save(&[row(1), row(2)]).unwrap();
        let rows = storage.load().unwrap();
        assert_eq!(rows, vec![row(1), row(2)]);

        let text = std::fs::read_to_string(storage.path()).unwrap();
        assert!(text.contains("\"whiteSnapshot\""));
    }

    #[test]
    fn test_json_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStorage::new(&path).load().unwrap_err();
        assert!(matches!(err, StorageError::Format { .. }));
    }

    #[test]
    fn test_memory_fail_saves() {
        let storage = MemoryStorage::new();
        storage.save(&[row(1)]).unwrap();
        storage.set_fail_saves(true);
        assert!(storage.save(&[row(1), row(2)]).is_err());
        assert_eq!(storage.load().unwrap().len(), 1);
    }
}
