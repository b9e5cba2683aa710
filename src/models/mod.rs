//! Data types shared across the session layer.

pub mod auth;
pub mod credential;

pub use auth::{LoginRequest, LoginResponse, RefreshTokenRequest, RefreshTokenResponse};
pub use credential::{Credential, StoredCredential, UserProfile};
