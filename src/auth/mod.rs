//! Session state, the identity endpoints, and token refresh.

pub mod api;
pub mod refresh;
pub mod session;
pub mod store;

pub use api::{HttpIdentityApi, IdentityApi};
pub use refresh::{RefreshOutcome, RefreshStatus, TokenRefresher};
pub use session::AuthSession;
pub use store::CredentialStore;
