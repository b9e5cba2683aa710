//! The session credential and its persisted form.

use serde::{Deserialize, Serialize};

use super::auth::LoginResponse;

/// Profile fields returned by the login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<i32>,
    pub role_name: Option<String>,
    pub position: Option<i64>,
    pub position_name: Option<String>,
    pub user_entity_authority: Option<String>,
    #[serde(default)]
    pub commercial_policy_access: Option<String>,
}

/// Current session state, owned by [`CredentialStore`](crate::auth::CredentialStore).
///
/// Everyone outside the store works on snapshots of this value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub profile: UserProfile,
    /// Message of the last failed login or refresh, cleared on success.
    pub error: Option<String>,
}

impl Credential {
    /// Build an authenticated credential from a successful login.
    pub fn from_login(response: &LoginResponse) -> Self {
        Self {
            access_token: Some(response.access_token.clone()),
            refresh_token: Some(response.refresh_token.clone()),
            is_authenticated: true,
            profile: response.profile(),
            error: None,
        }
    }

    /// Restore a credential from storage. Authenticated only when both
    /// tokens are present and non-empty.
    pub fn from_stored(stored: StoredCredential) -> Self {
        let has_both = non_empty(&stored.access_token) && non_empty(&stored.refresh_token);
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            is_authenticated: has_both,
            profile: stored.profile,
            error: None,
        }
    }

    /// The access token, if present and non-empty.
    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The refresh token, if present and non-empty.
    pub fn refresh(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The subset of this credential that survives a restart.
    pub fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            profile: self.profile.clone(),
            saved_at: chrono::Utc::now().timestamp(),
        }
    }
}

fn non_empty(token: &Option<String>) -> bool {
    token.as_deref().is_some_and(|t| !t.is_empty())
}

// Tokens never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("has_access_token", &self.bearer().is_some())
            .field("has_refresh_token", &self.refresh().is_some())
            .field("is_authenticated", &self.is_authenticated)
            .field("username", &self.profile.username)
            .field("error", &self.error)
            .finish()
    }
}

/// Persisted form of a [`Credential`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub profile: UserProfile,
    /// Unix timestamp of the last write.
    #[serde(default)]
    pub saved_at: i64,
}
