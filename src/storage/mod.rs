//! Durable storage for the session credential.
//!
//! Provides the [`CredentialStorage`] trait and implementations:
//! - [`FileCredentialStorage`] - JSON file with 0600 permissions
//! - [`MemoryCredentialStorage`] - In-memory (testing)
//! - [`KeyringCredentialStorage`] - System keyring (feature-gated)

mod file;
mod memory;

#[cfg(feature = "system-keyring")]
mod keyring;

use std::sync::Arc;

use async_trait::async_trait;

pub use file::FileCredentialStorage;
pub use memory::MemoryCredentialStorage;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringCredentialStorage;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use crate::models::StoredCredential;

/// Trait for credential storage backends.
#[async_trait]
pub trait CredentialStorage: Send + Sync {
    /// Load the stored credential, if any.
    async fn load(&self) -> Result<Option<StoredCredential>>;

    /// Replace the stored credential.
    async fn save(&self, credential: &StoredCredential) -> Result<()>;

    /// Remove the stored credential. Removing nothing is not an error.
    async fn remove(&self) -> Result<()>;

    /// Check if a credential is stored.
    async fn exists(&self) -> Result<bool> {
        Ok(self.load().await?.is_some())
    }

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Blanket impl for `Arc<T>`.
#[async_trait]
impl<T: CredentialStorage + ?Sized> CredentialStorage for Arc<T> {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        (**self).load().await
    }
    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        (**self).save(credential).await
    }
    async fn remove(&self) -> Result<()> {
        (**self).remove().await
    }
    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Blanket impl for `Box<T>`.
#[async_trait]
impl<T: CredentialStorage + ?Sized> CredentialStorage for Box<T> {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        (**self).load().await
    }
    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        (**self).save(credential).await
    }
    async fn remove(&self) -> Result<()> {
        (**self).remove().await
    }
    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the backend selected in the configuration.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn CredentialStorage>> {
    match config.backend {
        StorageBackend::File => Ok(Arc::new(FileCredentialStorage::new(&config.path))),
        StorageBackend::Memory => Ok(Arc::new(MemoryCredentialStorage::new())),
        #[cfg(feature = "system-keyring")]
        StorageBackend::Keyring => Ok(Arc::new(KeyringCredentialStorage::new())),
        #[cfg(not(feature = "system-keyring"))]
        StorageBackend::Keyring => Err(crate::error::Error::Config(
            "storage.backend = \"keyring\" requires the system-keyring feature".into(),
        )),
    }
}
