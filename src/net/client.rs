//! Plain HTTP client shared by the identity API and the authenticated pipeline.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};
use url::Url;

use crate::config::{BackendConfig, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
use crate::error::{Error, Result};

/// Default user agent for the application.
pub const USER_AGENT: &str = concat!("pdi-auth/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over [`reqwest::Client`] carrying the standard timeouts.
///
/// Calls through this client are never retried by it.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client configured from the `[backend]` section.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::builder()
            .connect_timeout(config.connect_timeout())
            .request_timeout(config.request_timeout())
            .build()
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    builder: ClientBuilder,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            builder: Client::builder()
                .user_agent(USER_AGENT)
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT),
        }
    }
}

impl HttpClientBuilder {
    pub fn user_agent(mut self, ua: &str) -> Self {
        self.builder = self.builder.user_agent(ua);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.connect_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.builder = self.builder.timeout(timeout);
        self
    }

    pub fn build(self) -> HttpClient {
        let inner = match self.builder.build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to build HTTP client with custom config: {}; using defaults", e);
                Client::default()
            }
        };
        HttpClient { inner }
    }
}

/// Parse a base URL, normalizing it to end in `/` so relative joins keep
/// any path prefix (`https://host/api` + `auth/login` -> `https://host/api/auth/login`).
pub fn parse_base_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| Error::InvalidUrl(format!("{base}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Join an endpoint path onto a base URL produced by [`parse_base_url`].
pub fn join_url(base: &Url, path: &str) -> Result<Url> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
}
