//! JSON file store

use crate::storage::{Listing, SkippedRecord};
use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const JSON_EXT: &str = "json";

/// Directory of JSON records, one file per record
#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }

    /// Path of the record stored under `key` (`<base>/<key>.json`)
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.{}", key, JSON_EXT))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .map_err(|e| Error::from_path("create directory", &self.base_dir, e))
    }

    /// Load a JSON file. A missing file is [`Error::NotFound`].
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        read_json(&self.file_path(filename))
    }

    /// Load a JSON file, `None` when it does not exist
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        match self.load(filename) {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load the record stored under `key`
    pub fn load_record<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        read_json(&self.record_path(key))
    }

    /// Save a JSON file (temp file + atomic rename)
    pub fn save<T: Serialize>(&self, filename: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        write_json_atomic(&self.file_path(filename), data)
    }

    /// Save the record stored under `key`, replacing any previous snapshot
    pub fn save_record<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        self.ensure_dir()?;
        write_json_atomic(&self.record_path(key), data)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.record_path(key).exists()
    }

    /// Remove the record stored under `key`. A missing record is [`Error::NotFound`].
    pub fn remove_record(&self, key: &str) -> Result<()> {
        let path = self.record_path(key);
        fs::remove_file(&path).map_err(|e| Error::from_path("remove", &path, e))
    }

    /// Keys (file stems) of every `.json` record in the store
    pub fn keys(&self) -> Result<Vec<String>> {
        self.ensure_dir()?;
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| Error::from_path("read directory", &self.base_dir, e))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::from_path("read directory", &self.base_dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JSON_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Load every record. Records that fail to read or parse are skipped
    /// and reported individually; they never abort the listing.
    pub fn scan<T: DeserializeOwned>(&self) -> Result<Listing<T>> {
        let mut listing = Listing::default();
        for key in self.keys()? {
            match self.load_record::<T>(&key) {
                Ok(item) => listing.items.push(item),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable record");
                    listing.skipped.push(SkippedRecord {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(listing)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| Error::from_path("read", path, e))?;
    serde_json::from_str(&content).map_err(|source| Error::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(data)?;
    content.push('\n');

    // Unique temp name so writers in separate processes never share one.
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, content).map_err(|e| Error::from_path("write", &tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::from_path("replace", path, e));
    }
    debug!(path = %path.display(), "wrote record");
    Ok(())
}
