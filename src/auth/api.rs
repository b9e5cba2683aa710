//! Identity backend endpoints.
//!
//! These calls go through a plain [`HttpClient`], never through the
//! authenticated pipeline, so a refresh can never recurse into itself.

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::config::{LOGIN_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::models::auth::ErrorBody;
use crate::models::{LoginRequest, LoginResponse, RefreshTokenRequest, RefreshTokenResponse};
use crate::net::client::{HttpClient, join_url, parse_base_url};

/// Login and refresh against the identity backend.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// POST `/auth/login`.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;

    /// POST `/auth/refreshtoken` with `{"refreshToken": "..."}`.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse>;
}

/// [`IdentityApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIdentityApi {
    http: HttpClient,
    login_url: Url,
    refresh_url: Url,
}

impl HttpIdentityApi {
    pub fn new(http: HttpClient, base_url: &str) -> Result<Self> {
        let base = parse_base_url(base_url)?;
        Ok(Self {
            http,
            login_url: join_url(&base, LOGIN_PATH)?,
            refresh_url: join_url(&base, REFRESH_PATH)?,
        })
    }

    async fn post<B, T>(&self, url: &Url, body: &B) -> Result<T>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .inner()
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(Error::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Api {
                status: status.as_u16(),
                message: format!("Failed to parse response: {e}"),
            })
    }
}

#[async_trait]
impl IdentityApi for HttpIdentityApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        info!(username = %request.username, "Logging in");
        let response: LoginResponse = self.post(&self.login_url, request).await?;
        if response.access_token.is_empty() {
            return Err(Error::LoginFailed("Response does not contain accessToken".into()));
        }
        debug!("Login accepted");
        Ok(response)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse> {
        if refresh_token.is_empty() {
            return Err(Error::MissingCredential("refresh_token".into()));
        }
        let body = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response = self.post(&self.refresh_url, &body).await?;
        debug!("Refresh endpoint answered");
        Ok(response)
    }
}

/// Prefer the backend's `{"error": "..."}` message, then the raw body, then the
/// status reason.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(ErrorBody { error: Some(message) }) = serde_json::from_str::<ErrorBody>(body) {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
