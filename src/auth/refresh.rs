//! Single-flight token refresh.
//!
//! Every refresh in the process goes through [`TokenRefresher`]. While a
//! refresh is in flight, later callers (401 handler, scheduler, monitor,
//! manual trigger) await the same shared future instead of issuing a second
//! network call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::api::IdentityApi;
use super::store::CredentialStore;
use crate::storage::CredentialStorage;

/// Result of one refresh, shared by every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The access token to use from now on.
    Success(String),
    /// Why the refresh failed. The same text is recorded in the store.
    Failure(String),
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The new access token, if the refresh succeeded with a non-empty one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Success(token) if !token.is_empty() => Some(token.as_str()),
            _ => None,
        }
    }
}

/// Token health as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefreshStatus {
    #[default]
    Valid,
    Refreshing,
    Error(String),
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

struct Inner {
    store: Arc<CredentialStore>,
    api: Arc<dyn IdentityApi>,
    storage: Option<Arc<dyn CredentialStorage>>,
    status: watch::Sender<RefreshStatus>,
    calls: AtomicU64,
    flights: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

/// Process-wide refresh operation. Cheap to clone; clones share the
/// in-flight slot.
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

impl TokenRefresher {
    pub fn new(store: Arc<CredentialStore>, api: Arc<dyn IdentityApi>) -> Self {
        Self::build(store, api, None)
    }

    /// Like [`new`](Self::new), but refreshed tokens are also written to `storage`.
    pub fn with_storage(
        store: Arc<CredentialStore>,
        api: Arc<dyn IdentityApi>,
        storage: Arc<dyn CredentialStorage>,
    ) -> Self {
        Self::build(store, api, Some(storage))
    }

    fn build(
        store: Arc<CredentialStore>,
        api: Arc<dyn IdentityApi>,
        storage: Option<Arc<dyn CredentialStorage>>,
    ) -> Self {
        let (status, _rx) = watch::channel(RefreshStatus::Valid);
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                storage,
                status,
                calls: AtomicU64::new(0),
                flights: AtomicU64::new(0),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Subscribe to status transitions.
    pub fn status(&self) -> watch::Receiver<RefreshStatus> {
        self.inner.status.subscribe()
    }

    pub fn current_status(&self) -> RefreshStatus {
        self.inner.status.borrow().clone()
    }

    /// Mark the token healthy without refreshing (foreground monitor).
    pub fn publish_valid(&self) {
        self.inner.status.send_if_modified(|s| {
            if *s == RefreshStatus::Valid {
                false
            } else {
                *s = RefreshStatus::Valid;
                true
            }
        });
    }

    /// Number of refresh network calls issued so far.
    pub fn refresh_calls(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Refresh now, or join the refresh already in flight.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.join_or_start(None).await
    }

    /// Refresh after the backend rejected `rejected_token`.
    ///
    /// If the store already holds a different non-empty token, another caller
    /// has refreshed in the meantime and that token is returned without a
    /// network call.
    pub async fn refresh_after_rejection(&self, rejected_token: Option<&str>) -> RefreshOutcome {
        self.join_or_start(Some(rejected_token.unwrap_or_default())).await
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<InFlight>> {
        self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start(&self, rejected_token: Option<&str>) -> SharedRefresh {
        let mut slot = self.lock_slot();

        if let Some(flight) = slot.as_ref() {
            debug!(flight = flight.id, "Joining in-flight refresh");
            return flight.future.clone();
        }

        // The slot is only emptied after the finished flight has written the
        // store, so this comparison sees its result.
        if let (Some(rejected), Some(current)) = (rejected_token, self.inner.store.access_token()) {
            if current != rejected {
                debug!("Token already replaced by another caller, reusing it");
                return futures::future::ready(RefreshOutcome::Success(current))
                    .boxed()
                    .shared();
            }
        }

        let id = self.inner.flights.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        // Spawned so that the refresh completes even if every waiter goes away.
        let handle = tokio::spawn(async move {
            let outcome = run_refresh(&inner).await;
            let mut slot = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|f| f.id == id) {
                *slot = None;
            }
            outcome
        });
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| RefreshOutcome::Failure(format!("Refresh task failed: {e}")))
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }
}

async fn run_refresh(inner: &Inner) -> RefreshOutcome {
    let Some(refresh_token) = inner.store.refresh_token() else {
        return fail(inner, "No refresh token available".to_string());
    };

    inner.status.send_replace(RefreshStatus::Refreshing);
    inner.calls.fetch_add(1, Ordering::SeqCst);
    info!("Refreshing access token");

    let response = match inner.api.refresh(&refresh_token).await {
        Ok(response) => response,
        Err(e) => return fail(inner, e.to_string()),
    };
    if response.access_token.is_empty() {
        return fail(inner, "Refresh response does not contain accessToken".to_string());
    }

    let new_refresh = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .unwrap_or(refresh_token);
    inner
        .store
        .update_tokens(response.access_token.clone(), new_refresh);
    persist(inner).await;

    inner.status.send_replace(RefreshStatus::Valid);
    info!("Access token refreshed");
    RefreshOutcome::Success(response.access_token)
}

fn fail(inner: &Inner, reason: String) -> RefreshOutcome {
    warn!(error = %reason, "Token refresh failed");
    inner.store.mark_failed(reason.clone());
    inner.status.send_replace(RefreshStatus::Error(reason.clone()));
    RefreshOutcome::Failure(reason)
}

async fn persist(inner: &Inner) {
    if let Some(storage) = &inner.storage {
        let stored = inner.store.snapshot().to_stored();
        if let Err(e) = storage.save(&stored).await {
            warn!(backend = storage.name(), error = %e, "Failed to persist refreshed credential");
        }
    }
}

impl std::fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("status", &*self.inner.status.borrow())
            .field("refresh_calls", &self.refresh_calls())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::models::{Credential, LoginRequest, LoginResponse, RefreshTokenResponse};
    use crate::storage::MemoryCredentialStorage;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Scripted identity backend. Each refresh pops the next response;
    /// an exhausted script fails.
    pub(crate) struct ScriptedApi {
        pub responses: Mutex<Vec<Result<RefreshTokenResponse>>>,
        pub calls: AtomicUsize,
        pub delay: Duration,
        pub seen: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        pub(crate) fn new(responses: Vec<Result<RefreshTokenResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub(crate) fn tokens(access: &str, refresh: &str) -> Result<RefreshTokenResponse> {
        Ok(RefreshTokenResponse {
            access_token: access.into(),
            refresh_token: Some(refresh.into()),
            token_type: Some("Bearer".into()),
        })
    }

    #[async_trait::async_trait]
    impl IdentityApi for ScriptedApi {
        async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse> {
            Err(Error::LoginFailed("not scripted".into()))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(refresh_token.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::RefreshFailed("script exhausted".into())))
        }
    }

    pub(crate) fn logged_in_store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::with_credential(Credential {
            access_token: Some("A1".into()),
            refresh_token: Some("R1".into()),
            is_authenticated: true,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_success_updates_store() {
        let store = logged_in_store();
        let api = Arc::new(ScriptedApi::new(vec![tokens("A2", "R2")]));
        let refresher = TokenRefresher::new(store.clone(), api.clone());

        assert_eq!(refresher.refresh().await, RefreshOutcome::Success("A2".into()));

        let credential = store.snapshot();
        assert_eq!(credential.access_token.as_deref(), Some("A2"));
        assert_eq!(credential.refresh_token.as_deref(), Some("R2"));
        assert!(credential.is_authenticated);
        assert_eq!(api.seen.lock().unwrap().as_slice(), ["R1"]);
        assert_eq!(refresher.current_status(), RefreshStatus::Valid);
        assert_eq!(refresher.refresh_calls(), 1);
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_failure_keeps_tokens() {
        let store = logged_in_store();
        let api = Arc::new(ScriptedApi::new(vec![Err(Error::Api {
            status: 401,
            message: "Refresh token expired".into(),
        })]));
        let refresher = TokenRefresher::new(store.clone(), api);

        let outcome = refresher.refresh().await;
        assert!(!outcome.is_success());

        let credential = store.snapshot();
        assert!(!credential.is_authenticated);
        assert!(credential.error.unwrap().contains("Refresh token expired"));
        assert_eq!(credential.access_token.as_deref(), Some("A1"));
        assert_eq!(credential.refresh_token.as_deref(), Some("R1"));
        assert!(matches!(refresher.current_status(), RefreshStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_empty_access_token_is_failure() {
        let store = logged_in_store();
        let api = Arc::new(ScriptedApi::new(vec![tokens("", "R2")]));
        let refresher = TokenRefresher::new(store.clone(), api);

        assert!(!refresher.refresh().await.is_success());
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_makes_no_call() {
        let store = Arc::new(CredentialStore::new());
        let api = Arc::new(ScriptedApi::new(vec![tokens("A2", "R2")]));
        let refresher = TokenRefresher::new(store.clone(), api.clone());

        assert!(!refresher.refresh().await.is_success());
        assert_eq!(api.calls(), 0);
        assert_eq!(refresher.refresh_calls(), 0);
        assert!(store.error().is_some());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_in_response_keeps_old() {
        let store = logged_in_store();
        let api = Arc::new(ScriptedApi::new(vec![Ok(RefreshTokenResponse {
            access_token: "A2".into(),
            refresh_token: None,
            token_type: None,
        })]));
        let refresher = TokenRefresher::new(store.clone(), api);

        assert!(refresher.refresh().await.is_success());
        assert_eq!(store.refresh_token().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let store = logged_in_store();
        let api = Arc::new(
            ScriptedApi::new(vec![tokens("A2", "R2"), tokens("A3", "R3")])
                .with_delay(Duration::from_millis(100)),
        );
        let refresher = TokenRefresher::new(store, api.clone());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let refresher = refresher.clone();
                tokio::spawn(async move { refresher.refresh_after_rejection(Some("A1")).await })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), RefreshOutcome::Success("A2".into()));
        }
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_rejection_reuses_current_token() {
        let store = logged_in_store();
        let api = Arc::new(ScriptedApi::new(vec![tokens("A2", "R2"), tokens("A3", "R3")]));
        let refresher = TokenRefresher::new(store, api.clone());

        assert!(refresher.refresh_after_rejection(Some("A1")).await.is_success());
        // A late 401 for the old token does not refresh again.
        let outcome = refresher.refresh_after_rejection(Some("A1")).await;
        assert_eq!(outcome, RefreshOutcome::Success("A2".into()));
        assert_eq!(api.calls(), 1);

        // A 401 for the current token does.
        let outcome = refresher.refresh_after_rejection(Some("A2")).await;
        assert_eq!(outcome, RefreshOutcome::Success("A3".into()));
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let store = logged_in_store();
        let api = Arc::new(
            ScriptedApi::new(vec![tokens("A2", "R2")]).with_delay(Duration::from_millis(50)),
        );
        let refresher = TokenRefresher::new(store, api);
        let mut status = refresher.status();

        let task = {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.refresh().await })
        };

        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), RefreshStatus::Refreshing);
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), RefreshStatus::Valid);
        assert!(task.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_refresh_persists() {
        let store = logged_in_store();
        let storage = Arc::new(MemoryCredentialStorage::new());
        let api = Arc::new(ScriptedApi::new(vec![tokens("A2", "R2")]));
        let refresher = TokenRefresher::with_storage(store, api, storage.clone());

        refresher.refresh().await;
        let stored = storage.load().await.unwrap().unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("A2"));
        assert_eq!(stored.refresh_token.as_deref(), Some("R2"));
    }
}
