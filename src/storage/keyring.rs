//! Keyring-based credential storage.
//!
//! The credential is serialized to JSON and kept as a single keyring secret.

use async_trait::async_trait;
use tracing::instrument;

use super::CredentialStorage;
use crate::error::{Error, Result};
use crate::models::StoredCredential;

/// System keyring storage.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStorage {
    service: String,
    account: String,
}

impl Default for KeyringCredentialStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStorage {
    const SERVICE_NAME: &'static str = "pdi-auth";
    const ACCOUNT: &'static str = "session";

    pub fn new() -> Self {
        Self::with_service(Self::SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: Self::ACCOUNT.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| Error::Storage(format!("Failed to create keyring entry: {e}")))
    }
}

#[async_trait]
impl CredentialStorage for KeyringCredentialStorage {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<StoredCredential>> {
        match self.entry()?.get_password() {
            Ok(secret) => serde_json::from_str(&secret)
                .map(Some)
                .map_err(|e| Error::StorageSerialization(e.to_string())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Storage(format!("Keyring error: {e}"))),
        }
    }

    #[instrument(skip(self, credential))]
    async fn save(&self, credential: &StoredCredential) -> Result<()> {
        let json = serde_json::to_string(credential)
            .map_err(|e| Error::StorageSerialization(e.to_string()))?;
        self.entry()?
            .set_password(&json)
            .map_err(|e| Error::Storage(format!("Keyring error: {e}")))
    }

    #[instrument(skip(self))]
    async fn remove(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(format!("Keyring error: {e}"))),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
