//! Persistence of the detected system time offset.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const OFFSET_KEY: &str = "detected_system_time_offset";

#[derive(Debug, Error)]
pub enum OffsetStoreError {
    #[error("offset store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("offset store is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait OffsetStore: Send + Sync {
    /// Last persisted offset in seconds, `None` if nothing was ever stored.
    fn load(&self) -> Result<Option<f64>, OffsetStoreError>;
    fn store(&self, offset_secs: f64) -> Result<(), OffsetStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    value: Mutex<Option<f64>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(offset_secs: f64) -> Self {
        Self {
            value: Mutex::new(Some(offset_secs)),
        }
    }

    pub fn value(&self) -> Option<f64> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self) -> Result<Option<f64>, OffsetStoreError> {
        Ok(self.value())
    }

    fn store(&self, offset_secs: f64) -> Result<(), OffsetStoreError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(offset_secs);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedTimeTrust {
    #[serde(rename = "detected_system_time_offset", default)]
    detected_offset: Option<f64>,
}

/// JSON file holding the offset under [`OFFSET_KEY`].
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct JsonFileOffsetStore {
    path: PathBuf,
}

impl JsonFileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OffsetStore for JsonFileOffsetStore {
    fn load(&self) -> Result<Option<f64>, OffsetStoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedTimeTrust = serde_json::from_str(&contents)?;
        Ok(persisted.detected_offset)
    }

    fn store(&self, offset_secs: f64) -> Result<(), OffsetStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let persisted = PersistedTimeTrust {
            detected_offset: Some(offset_secs),
        };
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&persisted)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
