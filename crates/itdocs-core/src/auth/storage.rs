//! Durable backends for the access/refresh token pair.
//!
//! Every backend keeps exactly two string values under the fixed keys
//! `access_token` and `refresh_token`. Backends report what they find; the
//! `TokenStore` decides what a missing or half-written pair means.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use keyring::Entry;
use serde_json::{Map, Value};

use crate::models::TokenPair;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Token file name in the data directory
const TOKEN_FILE: &str = "tokens.json";

/// Keychain service name
const KEYRING_SERVICE: &str = "itdocs";

/// Raw values read back from a backend. Either side may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    fn from_values(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.filter(|value| !value.trim().is_empty()),
            refresh_token: refresh_token.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// A durable home for the token pair.
pub trait TokenStorage: Send + Sync {
    /// Read both values. A missing value is `None`, not an error.
    fn load(&self) -> Result<StoredTokens>;

    /// Replace both values.
    fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Remove both values. Removing what is not there succeeds.
    fn clear(&self) -> Result<()>;
}

// ============================================================================
// File
// ============================================================================

/// Token pair as a small JSON object in the data directory.
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join(TOKEN_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn write_restricted(path: &PathBuf, contents: &str) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(path)
                .with_context(|| format!("Failed to open {} for writing", path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush {}", path.display()))?;
        }

        #[cfg(not(unix))]
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .with_context(|| format!("Failed to open {} for writing", path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }

        Ok(())
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<StoredTokens> {
        if !self.path.exists() {
            return Ok(StoredTokens::default());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file {}", self.path.display()))?;
        let values: Map<String, Value> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse token file {}", self.path.display()))?;

        // Non-string values count as absent
        let read = |key: &str| values.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(StoredTokens::from_values(
            read(ACCESS_TOKEN_KEY),
            read(REFRESH_TOKEN_KEY),
        ))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let mut values = Map::new();
        values.insert(
            ACCESS_TOKEN_KEY.to_string(),
            Value::String(tokens.access_token.clone()),
        );
        values.insert(
            REFRESH_TOKEN_KEY.to_string(),
            Value::String(tokens.refresh_token.clone()),
        );
        let contents = serde_json::to_string_pretty(&values)
            .context("Failed to serialize token file")?;

        // Write beside the target and rename so readers never see half a file
        let tmp_path = self.path.with_extension("json.tmp");
        Self::write_restricted(&tmp_path, &contents)?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove token file {}", self.path.display())),
        }
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Token pair as two OS keychain entries.
pub struct KeyringTokenStorage {
    service: String,
}

impl KeyringTokenStorage {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

impl Default for KeyringTokenStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStorage for KeyringTokenStorage {
    fn load(&self) -> Result<StoredTokens> {
        Ok(StoredTokens::from_values(
            self.read(ACCESS_TOKEN_KEY)?,
            self.read(REFRESH_TOKEN_KEY)?,
        ))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        self.entry(ACCESS_TOKEN_KEY)?
            .set_password(&tokens.access_token)
            .context("Failed to store access token in keychain")?;
        self.entry(REFRESH_TOKEN_KEY)?
            .set_password(&tokens.refresh_token)
            .context("Failed to store refresh token in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.delete(ACCESS_TOKEN_KEY)?;
        self.delete(REFRESH_TOKEN_KEY)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// Process-local storage. Clones share the same slot, which lets a test
/// reopen a store over the "same disk".
#[derive(Clone, Default)]
pub struct MemoryTokenStorage {
    slot: Arc<Mutex<StoredTokens>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw values, including half-written states
    pub fn with_values(access_token: Option<&str>, refresh_token: Option<&str>) -> Self {
        let storage = Self::new();
        *storage.lock() = StoredTokens {
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
        };
        storage
    }

    pub fn snapshot(&self) -> StoredTokens {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredTokens> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<StoredTokens> {
        let stored = self.lock().clone();
        Ok(StoredTokens::from_values(stored.access_token, stored.refresh_token))
    }

    fn save(&self, tokens: &TokenPair) -> Result<()> {
        *self.lock() = StoredTokens {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
        };
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = StoredTokens::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().join("itdocs"));

        assert_eq!(storage.load().expect("load"), StoredTokens::default());

        storage.save(&TokenPair::new("a1", "r1")).expect("save");
        let loaded = storage.load().expect("load");
        assert_eq!(loaded.access_token.as_deref(), Some("a1"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("r1"));
        assert!(!storage.path().with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().to_path_buf());
        storage.save(&TokenPair::new("a", "r")).expect("save");

        let mode = fs::metadata(storage.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_storage_clear_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().to_path_buf());
        storage.save(&TokenPair::new("a", "r")).expect("save");

        storage.clear().expect("first clear");
        storage.clear().expect("second clear");
        assert!(!storage.path().exists());
    }

    #[test]
    fn test_file_storage_malformed_values_are_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().to_path_buf());
        fs::write(
            storage.path(),
            r#"{"access_token": 42, "refresh_token": "  "}"#,
        )
        .expect("write");

        assert_eq!(storage.load().expect("load"), StoredTokens::default());
    }

    #[test]
    fn test_file_storage_corrupt_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().to_path_buf());
        fs::write(storage.path(), "{\"access_tok").expect("write");

        assert!(storage.load().is_err());
    }

    #[test]
    fn test_memory_storage_clones_share_slot() {
        let storage = MemoryTokenStorage::new();
        let other = storage.clone();
        storage.save(&TokenPair::new("a", "r")).expect("save");

        assert_eq!(other.load().expect("load").access_token.as_deref(), Some("a"));
        other.clear().expect("clear");
        assert_eq!(storage.snapshot(), StoredTokens::default());
    }
}
