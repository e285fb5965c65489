// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Persistence of the CLI session between invocations.

use serde_json::Value;
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const PAYID: &str = "payid";
pub const IDENTITY_KEY: &str = "identity-key";
pub const SERVER_KEY: &str = "server-key";
pub const SERVER_CERT: &str = "server-cert";

/// Every entry the CLI stores.
pub const ENTRIES: [&str; 4] = [PAYID, IDENTITY_KEY, SERVER_KEY, SERVER_CERT];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid storage entry name: {0}")]
    InvalidName(String),
    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt entry '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Keyed storage of JSON values.
pub trait Storage {
    /// Returns the value stored under `name`, if any.
    fn get(&self, name: &str) -> Result<Option<Value>, StorageError>;

    fn set(&self, name: &str, value: &Value) -> Result<(), StorageError>;

    /// Removes `name`. Removing a missing entry is not an error.
    fn remove(&self, name: &str) -> Result<(), StorageError>;

    /// Removes every entry the CLI uses.
    fn clear(&self) -> Result<(), StorageError> {
        ENTRIES.iter().try_for_each(|name| self.remove(name))
    }
}

/// Stores each entry as `<name>.json` in a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Uses `dir`, which is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StorageError::InvalidName(name.to_owned()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl Storage for FileStorage {
    fn get(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let path = self.entry_path(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StorageError::Json { path, source })
    }

    fn set(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.entry_path(name)?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let contents = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, contents).map_err(|source| StorageError::Io { path, source })
    }

    fn remove(&self, name: &str) -> Result<(), StorageError> {
        let path = self.entry_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}
