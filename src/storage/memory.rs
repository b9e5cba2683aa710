//! In-memory credential storage for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CredentialStorage;
use crate::error::Result;
use crate::models::StoredCredential;

/// In-memory credential storage, primarily for testing.
#[derive(Debug, Default)]
pub struct MemoryCredentialStorage {
    credential: RwLock<Option<StoredCredential>>,
}

impl MemoryCredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with a credential.
    pub fn with_credential(credential: StoredCredential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl CredentialStorage for MemoryCredentialStorage {
    async fn load(&self) -> Result<Option<StoredCredential>> {
        Ok(self.credential.read().await.clone())
    }

    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        *self.credential.write().await = Some(credential.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        self.credential.write().await.take();
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.credential.read().await.is_some())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
