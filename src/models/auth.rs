//! Wire types of the identity endpoints.

use serde::{Deserialize, Serialize};

use super::credential::UserProfile;

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Successful `POST /auth/login` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<i32>,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub position_name: Option<String>,
    #[serde(default)]
    pub user_entity_authority: Option<String>,
    /// Sent as a string flag, not a JSON boolean.
    #[serde(default)]
    pub user_has_access_to_commercial_policy: Option<String>,
}

impl LoginResponse {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            role_name: self.role_name.clone(),
            position: self.position,
            position_name: self.position_name.clone(),
            user_entity_authority: self.user_entity_authority.clone(),
            commercial_policy_access: self.user_has_access_to_commercial_policy.clone(),
        }
    }
}

/// Body of `POST /auth/refreshtoken`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Successful `POST /auth/refreshtoken` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Error body the identity backend sends with 4xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}
