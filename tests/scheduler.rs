//! Background refresh against a mocked identity backend.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pdi_auth::auth::HttpIdentityApi;
use pdi_auth::config::RefreshConfig;
use pdi_auth::models::{StoredCredential, UserProfile};
use pdi_auth::net::HttpClient;
use pdi_auth::scheduler::AlwaysOnline;
use pdi_auth::storage::{CredentialStorage, FileCredentialStorage};
use pdi_auth::{AuthSession, RefreshScheduler, RefreshStatus, RunOutcome};

fn session(server: &MockServer, storage: Arc<dyn CredentialStorage>) -> AuthSession {
    let api = HttpIdentityApi::new(HttpClient::new(), &server.uri()).unwrap();
    AuthSession::new(Arc::new(api), storage)
}

fn scheduler(session: &AuthSession) -> RefreshScheduler {
    RefreshScheduler::new(
        session.refresher().clone(),
        Arc::new(AlwaysOnline),
        RefreshConfig::default(),
    )
}

#[tokio::test]
async fn test_unauthenticated_run_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refreshtoken"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileCredentialStorage::new(dir.path().join("creds.json")));
    let session = session(&server, storage);
    session.initialize().await.unwrap();

    assert_eq!(scheduler(&session).refresh_now().await, RunOutcome::Skipped);
}

#[tokio::test]
async fn test_run_refreshes_and_persists_to_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refreshtoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessToken": "A2",
            "refreshToken": "R2",
            "tokenType": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileCredentialStorage::new(dir.path().join("creds.json")));
    storage
        .save(&StoredCredential {
            access_token: Some("A1".into()),
            refresh_token: Some("R1".into()),
            profile: UserProfile::default(),
            saved_at: 0,
        })
        .await
        .unwrap();

    let session = session(&server, storage.clone());
    assert!(session.initialize().await.unwrap());

    let scheduler = scheduler(&session);
    assert_eq!(scheduler.refresh_now().await, RunOutcome::Refreshed);
    assert_eq!(session.refresher().current_status(), RefreshStatus::Valid);

    let stored = storage.load().await.unwrap().unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("A2"));
    assert_eq!(stored.refresh_token.as_deref(), Some("R2"));
}
