//! File-based credential storage with secure permissions.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::CredentialStorage;
use crate::error::{Error, Result};
use crate::models::StoredCredential;

/// JSON file storage, written with 0600 permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileCredentialStorage {
    path: PathBuf,
}

impl FileCredentialStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StoredCredential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::storage_io(&self.path, e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::StorageSerialization(e.to_string()))
    }

    fn write(&self, credential: &StoredCredential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage_io(parent, e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(credential)
            .map_err(|e| Error::StorageSerialization(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| Error::storage_io(&self.path, e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)
                .map_err(|e| Error::storage_io(&self.path, format!("chmod: {e}")))?;
        }

        debug!(path = %self.path.display(), "Credential saved");
        Ok(())
    }
}

#[async_trait]
impl CredentialStorage for FileCredentialStorage {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        self.read()
    }

    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        self.write(credential)
    }

    async fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_io(&self.path, e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}
