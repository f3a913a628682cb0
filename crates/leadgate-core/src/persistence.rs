//! Durable storage for rate-limiter state.
//!
//! The limiter's arithmetic never depends on where its history lives; it
//! loads one [`RateLimitSnapshot`] at construction and saves a fresh one after
//! every mutation.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UtcDateTime;

/// One upstream call that counted toward quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub at: UtcDateTime,
    pub success: bool,
}

/// Serialized form of the limiter: call history plus block timer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    #[serde(default)]
    pub calls: Vec<CallRecord>,
    #[serde(default)]
    pub blocked_until: Option<UtcDateTime>,
    /// Instant the last block lapsed; earlier calls cannot re-trigger it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_floor: Option<UtcDateTime>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate-limit state io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rate-limit state is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key-value style persistence port for limiter state.
pub trait RateLimitStore: Send + Sync + Debug {
    fn load(&self) -> Result<Option<RateLimitSnapshot>, StoreError>;
    fn save(&self, snapshot: &RateLimitSnapshot) -> Result<(), StoreError>;
}

/// Process-local store. State survives limiter re-creation but not restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<RateLimitSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: RateLimitSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }
}

impl RateLimitStore for MemoryStore {
    fn load(&self) -> Result<Option<RateLimitSnapshot>, StoreError> {
        Ok(self
            .snapshot
            .lock()
            .expect("memory store lock is not poisoned")
            .clone())
    }

    fn save(&self, snapshot: &RateLimitSnapshot) -> Result<(), StoreError> {
        *self
            .snapshot
            .lock()
            .expect("memory store lock is not poisoned") = Some(snapshot.clone());
        Ok(())
    }
}

/// JSON file store. Writes go to a sibling temp file that is renamed over
/// the target, so a crash never leaves a half-written state file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RateLimitStore for JsonFileStore {
    fn load(&self) -> Result<Option<RateLimitSnapshot>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error(error)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, snapshot: &RateLimitSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| self.io_error(error))?;
        }

        let payload = serde_json::to_string_pretty(snapshot)?;
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        fs::write(&temp_path, payload).map_err(|error| self.io_error(error))?;
        fs::rename(&temp_path, &self.path).map_err(|error| self.io_error(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshot() -> RateLimitSnapshot {
        RateLimitSnapshot {
            calls: vec![CallRecord {
                at: UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid"),
                success: true,
            }],
            blocked_until: Some(UtcDateTime::parse("2024-01-01T00:15:00Z").expect("valid")),
            hourly_floor: None,
        }
    }

    #[test]
    fn memory_store_returns_last_saved_snapshot() {
        let store = MemoryStore::new();
        assert_eq!(store.load().expect("load"), None);

        store.save(&snapshot()).expect("save");
        assert_eq!(store.load().expect("load"), Some(snapshot()));
    }

    #[test]
    fn json_store_missing_file_loads_as_none() {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().join("absent.json"));

        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn json_store_persists_across_instances() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("rate_limit.json");

        JsonFileStore::new(&path).save(&snapshot()).expect("save");
        let reloaded = JsonFileStore::new(&path).load().expect("load");

        assert_eq!(reloaded, Some(snapshot()));
        assert!(!dir.path().join("nested").join("rate_limit.json.tmp").exists());
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("rate_limit.json");
        fs::write(&path, "{not json").expect("write");

        let error = JsonFileStore::new(&path).load().expect_err("corrupt");
        assert!(matches!(error, StoreError::Serialization(_)));
    }
}
