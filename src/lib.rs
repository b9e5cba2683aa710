//! Session layer of the PDI field client: login, bearer authentication,
//! single-flight token refresh on 401, and background refresh scheduling.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod net;
pub mod scheduler;
pub mod storage;

pub use auth::{AuthSession, CredentialStore, RefreshOutcome, RefreshStatus, TokenRefresher};
pub use config::Config;
pub use error::{Error, Result};
pub use net::AuthenticatedClient;
pub use scheduler::{RefreshScheduler, RunOutcome};

use std::sync::Arc;

use scheduler::Connectivity;

/// Everything a running client needs, wired from one [`Config`].
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: AuthSession,
    pub client: AuthenticatedClient,
    pub scheduler: RefreshScheduler,
}

impl AppState {
    pub fn from_config(config: Config, connectivity: Arc<dyn Connectivity>) -> Result<Self> {
        let session = AuthSession::from_config(&config)?;
        let client = AuthenticatedClient::from_config(&config, &session)?;
        let scheduler = RefreshScheduler::new(
            session.refresher().clone(),
            connectivity,
            config.refresh.clone(),
        );
        Ok(Self {
            config: Arc::new(config),
            session,
            client,
            scheduler,
        })
    }
}
