//! Session facade: login, logout, restore, refresh.

use std::sync::Arc;

use tracing::{info, warn};

use super::api::{HttpIdentityApi, IdentityApi};
use super::refresh::{RefreshOutcome, TokenRefresher};
use super::store::CredentialStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Credential, LoginRequest};
use crate::net::client::HttpClient;
use crate::storage::{self, CredentialStorage};

/// Owns the credential store and the one [`TokenRefresher`] of the process.
#[derive(Clone)]
pub struct AuthSession {
    store: Arc<CredentialStore>,
    api: Arc<dyn IdentityApi>,
    storage: Arc<dyn CredentialStorage>,
    refresher: TokenRefresher,
}

impl AuthSession {
    pub fn new(api: Arc<dyn IdentityApi>, storage: Arc<dyn CredentialStorage>) -> Self {
        let store = Arc::new(CredentialStore::new());
        let refresher = TokenRefresher::with_storage(store.clone(), api.clone(), storage.clone());
        Self {
            store,
            api,
            storage,
            refresher,
        }
    }

    /// Session wired to the backend and storage named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = HttpClient::from_config(&config.backend);
        let api = HttpIdentityApi::new(http, &config.backend.base_url)?;
        let storage = storage::from_config(&config.storage)?;
        Ok(Self::new(Arc::new(api), storage))
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn refresher(&self) -> &TokenRefresher {
        &self.refresher
    }

    pub fn credential(&self) -> Credential {
        self.store.snapshot()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Restore a persisted session. Returns whether the restored session is
    /// authenticated. Unreadable storage leaves the session empty.
    pub async fn initialize(&self) -> Result<bool> {
        let stored = match self.storage.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(backend = self.storage.name(), error = %e, "Failed to load stored credential");
                None
            }
        };
        let Some(stored) = stored else {
            info!(backend = self.storage.name(), "No stored session");
            return Ok(false);
        };

        let credential = Credential::from_stored(stored);
        let authenticated = credential.is_authenticated;
        self.store.set(credential);
        info!(
            backend = self.storage.name(),
            authenticated, "Restored stored session"
        );
        Ok(authenticated)
    }

    /// Log in and persist the new session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                let message = match e {
                    Error::LoginFailed(message) => message,
                    other => other.to_string(),
                };
                warn!(username, error = %message, "Login failed");
                self.store.mark_failed(message.clone());
                return Err(Error::LoginFailed(message));
            }
        };

        let credential = Credential::from_login(&response);
        self.store.set(credential.clone());
        if let Err(e) = self.storage.save(&credential.to_stored()).await {
            warn!(backend = self.storage.name(), error = %e, "Failed to persist session");
        }
        info!(username, "Logged in");
        Ok(credential)
    }

    /// Drop the session in memory and in storage.
    pub async fn logout(&self) -> Result<()> {
        self.store.clear();
        if let Err(e) = self.storage.remove().await {
            warn!(backend = self.storage.name(), error = %e, "Failed to remove stored session");
        }
        info!("Logged out");
        Ok(())
    }

    /// Refresh through the shared single-flight operation.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresher.refresh().await
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("store", &self.store)
            .field("storage", &self.storage.name())
            .field("refresher", &self.refresher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StoredCredential, UserProfile};
    use crate::storage::MemoryCredentialStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_api(server: &MockServer) -> Arc<dyn IdentityApi> {
        Arc::new(HttpIdentityApi::new(HttpClient::new(), &server.uri()).unwrap())
    }

    #[tokio::test]
    async fn test_login_populates_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "A1",
                "refreshToken": "R1",
                "tokenType": "Bearer",
                "id": 42,
                "username": "inspector",
                "email": "inspector@example.com",
                "role": 2,
                "roleName": "Inspector",
                "position": 5,
                "positionName": "Field inspector",
                "userEntityAuthority": "DEALER",
                "userHasAccessToCommercialPolicy": "Y"
            })))
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryCredentialStorage::new());
        let session = AuthSession::new(http_api(&server), storage.clone());
        let credential = session.login("inspector", "pw").await.unwrap();

        assert!(credential.is_authenticated);
        assert_eq!(session.store().access_token().as_deref(), Some("A1"));
        assert_eq!(credential.profile.user_id, Some(42));
        assert_eq!(credential.profile.role, Some(2));
        assert_eq!(credential.profile.position, Some(5));
        assert_eq!(credential.profile.role_name.as_deref(), Some("Inspector"));
        assert_eq!(credential.profile.commercial_policy_access.as_deref(), Some("Y"));
        let stored = storage.load().await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("R1"));
        assert_eq!(stored.profile.position, Some(5));
    }

    #[tokio::test]
    async fn test_login_failure_records_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({ "error": "Bad credentials" })),
            )
            .mount(&server)
            .await;

        let session = AuthSession::new(http_api(&server), Arc::new(MemoryCredentialStorage::new()));
        let err = session.login("inspector", "wrong").await.unwrap_err();

        assert!(matches!(err, Error::LoginFailed(_)));
        assert!(!session.is_authenticated());
        assert!(session.credential().error.unwrap().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_initialize_restores_session() {
        let storage = Arc::new(MemoryCredentialStorage::with_credential(StoredCredential {
            access_token: Some("A1".into()),
            refresh_token: Some("R1".into()),
            profile: UserProfile {
                username: Some("inspector".into()),
                ..Default::default()
            },
            saved_at: 0,
        }));
        let server = MockServer::start().await;
        let session = AuthSession::new(http_api(&server), storage);

        assert!(session.initialize().await.unwrap());
        assert!(session.is_authenticated());
        assert_eq!(session.credential().profile.username.as_deref(), Some("inspector"));
    }

    #[tokio::test]
    async fn test_initialize_without_storage_is_unauthenticated() {
        let server = MockServer::start().await;
        let session = AuthSession::new(http_api(&server), Arc::new(MemoryCredentialStorage::new()));
        assert!(!session.initialize().await.unwrap());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let storage = Arc::new(MemoryCredentialStorage::with_credential(StoredCredential {
            access_token: Some("A1".into()),
            refresh_token: Some("R1".into()),
            profile: UserProfile::default(),
            saved_at: 0,
        }));
        let server = MockServer::start().await;
        let session = AuthSession::new(http_api(&server), storage.clone());
        session.initialize().await.unwrap();

        session.logout().await.unwrap();
        assert_eq!(session.credential(), Credential::default());
        assert!(!storage.exists().await.unwrap());
    }
}
