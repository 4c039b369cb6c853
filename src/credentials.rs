//! Local token storage keyed by server URL.
//!
//! The file is a JSON object mapping normalized server URLs to the latest
//! session token issued by that server. Every change rewrites the whole file
//! through a temporary file and an atomic rename, so a failed write leaves the
//! previous contents in place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application directory under the per-user config directory.
const APP_DIR: &str = "relay";

/// Token file name.
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Could not determine the user configuration directory")]
    NoConfigDir,

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt credential file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Normalize a server URL for use as a store key.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Persistent map from server URL to session token.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl CredentialStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| StorageError::Read {
                path: path.clone(),
                source,
            })?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents).map_err(|source| StorageError::Parse {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Default location: `<config_dir>/relay/credentials.json`.
    pub fn default_path() -> Result<PathBuf, StorageError> {
        let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(config_dir.join(APP_DIR).join(CREDENTIALS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token stored for `url`, if any.
    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(&normalize_url(url)).map(String::as_str)
    }

    /// Store `token` for `url`, replacing any previous one.
    pub fn put(&mut self, url: &str, token: &str) -> Result<(), StorageError> {
        let mut next = self.entries.clone();
        next.insert(normalize_url(url), token.to_string());
        self.commit(next)
    }

    /// Remove the entry for `url`. Returns whether one existed.
    pub fn remove(&mut self, url: &str) -> Result<bool, StorageError> {
        let key = normalize_url(url);
        if !self.entries.contains_key(&key) {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next.remove(&key);
        self.commit(next)?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn commit(&mut self, next: BTreeMap<String, String>) -> Result<(), StorageError> {
        write_atomically(&self.path, &next)?;
        self.entries = next;
        Ok(())
    }
}

fn write_atomically(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
    let write_err = |source: std::io::Error| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let contents = serde_json::to_string_pretty(entries)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut file = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    file.write_all(contents.as_bytes()).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;
    file.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://ci.example"), "https://ci.example/");
        assert_eq!(normalize_url("https://ci.example/"), "https://ci.example/");
        assert_eq!(normalize_url("  https://ci.example/jenkins "), "https://ci.example/jenkins/");
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("nested/credentials.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get("https://ci.example/"), None);
    }

    #[test]
    fn test_put_get_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay/credentials.json");

        let mut store = CredentialStore::open(&path).unwrap();
        store.put("https://ci.example", "tok-1").unwrap();
        assert_eq!(store.get("https://ci.example/"), Some("tok-1"));

        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.get("https://ci.example/"), Some("tok-1"));

        store.put("https://ci.example/", "tok-2").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(CredentialStore::open(&path).unwrap().get("https://ci.example"), Some("tok-2"));

        assert!(store.remove("https://ci.example/").unwrap());
        assert!(!store.remove("https://ci.example/").unwrap());
        assert!(CredentialStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            CredentialStore::open(&path),
            Err(StorageError::Parse { .. })
        ));
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mut store = CredentialStore::open(&path).unwrap();
        store.put("https://a.example/", "tok-a").unwrap();

        // Turn the target into a directory so the rename fails.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.put("https://b.example/", "tok-b").is_err());
        assert_eq!(store.get("https://b.example/"), None);
        assert_eq!(store.get("https://a.example/"), Some("tok-a"));
    }
}
