//! Durable JSON documents with one level of backup.
//!
//! Every save renames the current file to `<name>.bak` before writing the new
//! content, so an interrupted write leaves either the complete new document or
//! the previous one under the backup name. [`DocumentStore::load`] falls back
//! to the backup when the primary file is missing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ControllerError, Result};

const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ControllerError::Storage {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn backup_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{BACKUP_SUFFIX}"))
    }

    /// Load a document, preferring the primary file over its backup.
    /// Returns `Ok(None)` when neither exists.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let primary = self.path(name);
        if primary.exists() {
            return read_document(&primary).map(Some);
        }

        let backup = self.backup_path(name);
        if backup.exists() {
            tracing::warn!(
                document = name,
                backup = %backup.display(),
                "Primary state document missing, recovering from backup"
            );
            return read_document(&backup).map(Some);
        }

        Ok(None)
    }

    /// Rotate the current document to its backup, then write `doc` fresh.
    pub fn save<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        self.rotate(name)?;
        self.write(name, doc)
    }

    /// Move the current document (if any) to `<name>.bak`, replacing an older
    /// backup.
    pub fn rotate(&self, name: &str) -> Result<()> {
        let primary = self.path(name);
        if !primary.exists() {
            return Ok(());
        }
        let backup = self.backup_path(name);
        fs::rename(&primary, &backup).map_err(|source| ControllerError::Storage {
            path: primary,
            source,
        })
    }

    pub fn write<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        let path = self.path(name);
        let json = serde_json::to_string_pretty(doc).map_err(|source| {
            ControllerError::Document {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(|source| ControllerError::Storage { path, source })
    }

    /// Names of primary documents in the store that satisfy `filter`.
    /// Backups are never listed.
    pub fn list<F>(&self, filter: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ControllerError::Storage {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ControllerError::Storage {
                path: self.root.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(BACKUP_SUFFIX) || !filter(&name) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path).map_err(|source| ControllerError::Storage {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json).map_err(|source| ControllerError::Document {
        path: path.to_path_buf(),
        source,
    })
}
