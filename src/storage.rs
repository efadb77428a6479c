//! Minimal get/replace key-value persistence.
//!
//! The queue and the in-flight batch progress are each stored as one JSON
//! value under a fixed key. The storage medium is the caller's choice; two
//! implementations ship with the crate:
//!
//! * [`MemoryStore`] — process-local, for tests and embedding.
//! * [`JsonFileStore`] — one JSON object on disk, rewritten atomically
//!   (temp file + rename) so a crash mid-write never leaves a torn file.

use crate::error::Capture2PdfError;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key under which the queue aggregate is stored.
pub const QUEUE_KEY: &str = "queue";
/// Key under which the latest batch progress is stored.
pub const PROGRESS_KEY: &str = "batch_progress";

/// Whole-value get/replace storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, Capture2PdfError>;

    fn replace(&self, key: &str, value: Value) -> Result<(), Capture2PdfError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, Capture2PdfError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn replace(&self, key: &str, value: Value) -> Result<(), Capture2PdfError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Use `path` as the backing file. It is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self, key: &str) -> Result<Map<String, Value>, Capture2PdfError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(storage_err(key, format!("{}: {e}", self.path.display()))),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(storage_err(key, "state file is not a JSON object")),
            Err(e) => Err(storage_err(key, format!("corrupt state file: {e}"))),
        }
    }

    fn write_all(&self, key: &str, map: Map<String, Value>) -> Result<(), Capture2PdfError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| storage_err(key, e.to_string()))?;

        let json = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| storage_err(key, e.to_string()))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| storage_err(key, e.to_string()))?;
        tmp.write_all(&json)
            .map_err(|e| storage_err(key, e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| storage_err(key, e.to_string()))?;

        debug!("Persisted '{}' to {}", key, self.path.display());
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, Capture2PdfError> {
        let _guard = self.lock.lock();
        Ok(self.read_all(key)?.remove(key))
    }

    fn replace(&self, key: &str, value: Value) -> Result<(), Capture2PdfError> {
        let _guard = self.lock.lock();
        let mut map = self.read_all(key)?;
        map.insert(key.to_string(), value);
        self.write_all(key, map)
    }
}

fn storage_err(key: &str, detail: impl Into<String>) -> Capture2PdfError {
    Capture2PdfError::Storage {
        key: key.to_string(),
        detail: detail.into(),
    }
}
