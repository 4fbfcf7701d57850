//! Durable storage for the last-active package id.
//!
//! Only the id is persisted; the package body is refetched from the backend
//! on the next start.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config;
use crate::error::Result;

/// Where the realtime client keeps the id of the package it is showing.
pub trait PackageStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, package_id: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the id in a single file inside a data directory.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store under `dir`, creating the directory if needed.
    ///
    /// If `dir` is `None`, uses the platform-appropriate data directory.
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.unwrap_or_else(config::default_data_dir);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(config::PACKAGE_ID_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PackageStore for FileStore {
    fn load(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Writes to a temp file in the same directory and renames it into place,
    /// so a crash never leaves a truncated id behind.
    fn save(&self, package_id: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(package_id.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the id in memory only. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    id: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(package_id: &str) -> Self {
        Self {
            id: Mutex::new(Some(package_id.to_string())),
        }
    }
}

impl PackageStore for MemoryStore {
    fn load(&self) -> Option<String> {
        self.id.lock().ok().and_then(|id| id.clone())
    }

    fn save(&self, package_id: &str) -> Result<()> {
        if let Ok(mut id) = self.id.lock() {
            *id = Some(package_id.to_string());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut id) = self.id.lock() {
            *id = None;
        }
        Ok(())
    }
}
