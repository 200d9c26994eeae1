use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

/// Locates the on-disk directory holding per-user token records.
#[derive(Debug, Clone)]
pub struct StoreLocator {
    root: PathBuf,
}

impl StoreLocator {
    /// Attempt to discover the persistent token directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "oauth", "user-authorizer")
            .ok_or(ConfigError::MissingProjectDirs)?;
        let token_dir = dirs.config_dir();
        fs::create_dir_all(token_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(token_dir)?;
        Ok(Self {
            root: token_dir.to_path_buf(),
        })
    }

    /// Use an explicit directory instead of the platform default.
    pub fn from_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path to the token record for the given user id.
    pub fn token_file(&self, user_id: &str) -> PathBuf {
        self.root.join(format!("tokens-{user_id}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Errors that can occur when working with the token directory.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine a token directory for user-authorizer")]
    MissingProjectDirs,
    #[error("failed to create token directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn token_file_appends_user_id() {
        let temp_dir = TempDir::new().unwrap();
        let locator = StoreLocator::from_root(temp_dir.path().to_path_buf());
        let path = locator.token_file("u1");
        assert!(path.ends_with("tokens-u1.json"));
    }
}
