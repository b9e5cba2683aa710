//! In-memory owner of the session credential.
//!
//! The credential lives in a [`watch`] channel: reads are a synchronous
//! borrow that never waits on I/O, every write replaces the value as one
//! step, and observers can subscribe to changes.

use tokio::sync::watch;
use tracing::debug;

use crate::models::Credential;

pub struct CredentialStore {
    tx: watch::Sender<Credential>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// An empty store: no tokens, not authenticated.
    pub fn new() -> Self {
        Self::with_credential(Credential::default())
    }

    pub fn with_credential(credential: Credential) -> Self {
        let (tx, _rx) = watch::channel(credential);
        Self { tx }
    }

    /// Copy of the current credential.
    pub fn snapshot(&self) -> Credential {
        self.tx.borrow().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().bearer().map(str::to_owned)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tx.borrow().refresh().map(str::to_owned)
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated
    }

    pub fn error(&self) -> Option<String> {
        self.tx.borrow().error.clone()
    }

    /// Receive every subsequent credential change.
    pub fn subscribe(&self) -> watch::Receiver<Credential> {
        self.tx.subscribe()
    }

    /// Replace the whole credential (login, restore).
    pub fn set(&self, credential: Credential) {
        debug!(?credential, "Credential replaced");
        self.tx.send_replace(credential);
    }

    /// Install a refreshed token pair and mark the session authenticated.
    pub fn update_tokens(&self, access_token: String, refresh_token: String) {
        self.tx.send_modify(|c| {
            c.access_token = Some(access_token);
            c.refresh_token = Some(refresh_token);
            c.is_authenticated = true;
            c.error = None;
        });
    }

    /// Record a failed login or refresh. Tokens are left in place.
    pub fn mark_failed(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|c| {
            c.is_authenticated = false;
            c.error = Some(message);
        });
    }

    /// Drop the session entirely (logout).
    pub fn clear(&self) {
        self.tx.send_replace(Credential::default());
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("credential", &*self.tx.borrow())
            .finish()
    }
}
