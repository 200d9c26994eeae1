use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::StoreLocator;
use crate::error::AuthError;

/// Durable keyed storage for serialized credential records.
///
/// Records are opaque JSON text to the store; the authorizer owns the
/// record shape. Absence is `Ok(None)`, never an error.
pub trait TokenStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<String>, AuthError>;
    fn store(&self, user_id: &str, record: &str) -> Result<(), AuthError>;
    fn delete(&self, user_id: &str) -> Result<(), AuthError>;
}

/// Process-local token storage, mainly for tests and short-lived tools.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    records: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, user_id: &str) -> Result<Option<String>, AuthError> {
        Ok(self.records().get(user_id).cloned())
    }

    fn store(&self, user_id: &str, record: &str) -> Result<(), AuthError> {
        self.records().insert(user_id.to_owned(), record.to_owned());
        Ok(())
    }

    fn delete(&self, user_id: &str) -> Result<(), AuthError> {
        self.records().remove(user_id);
        Ok(())
    }
}

/// Filesystem-backed token storage, one record file per user id.
pub struct FileTokenStore {
    locator: StoreLocator,
}

impl FileTokenStore {
    pub fn new(locator: StoreLocator) -> Self {
        Self { locator }
    }

    pub fn with_default_locator() -> Result<Self, AuthError> {
        Ok(Self::new(StoreLocator::new()?))
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, user_id: &str) -> Result<Option<String>, AuthError> {
        let path = self.locator.token_file(user_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn store(&self, user_id: &str, record: &str) -> Result<(), AuthError> {
        let path = self.locator.token_file(user_id);
        Self::write_file(&path, record)
    }

    fn delete(&self, user_id: &str) -> Result<(), AuthError> {
        let path = self.locator.token_file(user_id);
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert!(store.load("u1").unwrap().is_none());
        store.store("u1", "{\"access_token\":\"AT\"}").unwrap();
        assert_eq!(
            store.load("u1").unwrap().as_deref(),
            Some("{\"access_token\":\"AT\"}")
        );
        store.delete("u1").unwrap();
        assert!(store.load("u1").unwrap().is_none());
    }

    #[test]
    fn file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let locator = StoreLocator::from_root(temp_dir.path().to_path_buf());
        let store = FileTokenStore::new(locator);
        store.store("u1", "{\"access_token\":\"AT\"}").unwrap();
        let raw = store.load("u1").unwrap().unwrap();
        assert_eq!(raw, "{\"access_token\":\"AT\"}");
        store.delete("u1").unwrap();
        assert!(store.load("u1").unwrap().is_none());
    }

    #[test]
    fn file_store_delete_missing_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let locator = StoreLocator::from_root(temp_dir.path().to_path_buf());
        let store = FileTokenStore::new(locator);
        store.delete("missing").unwrap();
    }

    #[test]
    fn stores_are_isolated_per_user() {
        let store = MemoryTokenStore::new();
        store.store("u1", "one").unwrap();
        store.store("u2", "two").unwrap();
        store.delete("u1").unwrap();
        assert!(store.load("u1").unwrap().is_none());
        assert_eq!(store.load("u2").unwrap().as_deref(), Some("two"));
    }
}
