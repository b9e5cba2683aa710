//! The authenticated HTTP pipeline domain clients are built on.
//!
//! interceptors -> send -> on 401: [`UnauthorizedHandler`] -> replay -> response

use std::sync::Arc;

use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::client::{HttpClient, join_url, parse_base_url};
use super::interceptor::{BearerAuthInterceptor, Interceptor, RequestIdInterceptor};
use super::unauthorized::{RequestAttempt, UnauthorizedHandler};
use crate::auth::AuthSession;
use crate::config::Config;
use crate::error::{Error, Result};

/// HTTP client that authenticates every request and recovers from expired
/// tokens.
///
/// A 401 that cannot be recovered from is returned as a normal response,
/// not as an error, so callers can prompt for a new login.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: HttpClient,
    base_url: Url,
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: UnauthorizedHandler,
}

impl AuthenticatedClient {
    /// Client with the standard interceptors (request id, bearer auth).
    pub fn new(http: HttpClient, base_url: &str, session: &AuthSession) -> Result<Self> {
        let handler = UnauthorizedHandler::new(session.refresher().clone());
        Ok(Self::builder(http, parse_base_url(base_url)?, handler)
            .interceptor(RequestIdInterceptor)
            .interceptor(BearerAuthInterceptor::new(session.store().clone()))
            .build())
    }

    /// Client configured from `config`, sharing `session`'s refresher.
    pub fn from_config(config: &Config, session: &AuthSession) -> Result<Self> {
        let handler = UnauthorizedHandler::with_max_attempts(
            session.refresher().clone(),
            config.refresh.max_auth_attempts,
        );
        Ok(Self::builder(
            HttpClient::from_config(&config.backend),
            parse_base_url(&config.backend.base_url)?,
            handler,
        )
        .interceptor(RequestIdInterceptor)
        .interceptor(BearerAuthInterceptor::new(session.store().clone()))
        .build())
    }

    pub fn builder(http: HttpClient, base_url: Url, handler: UnauthorizedHandler) -> AuthenticatedClientBuilder {
        AuthenticatedClientBuilder {
            http,
            base_url,
            interceptors: Vec::new(),
            handler,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for an endpoint path.
    pub fn url(&self, path: &str) -> Result<Url> {
        join_url(&self.base_url, path)
    }

    /// Start a request for `path`; send it with [`send`](Self::send).
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.http.inner().request(method, self.url(path)?))
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    /// Run one logical request through the pipeline.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let request = self
            .interceptors
            .iter()
            .fold(request, |request, interceptor| interceptor.intercept(request));

        let mut attempt = RequestAttempt::new(request);
        loop {
            // Keep the request for a possible replay; a streaming body
            // cannot be kept and goes out as the only attempt.
            let Some(outgoing) = attempt.request().try_clone() else {
                return self.send_raw(attempt.into_request()).await;
            };

            let response = self.send_raw(outgoing).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            debug!(
                path = response.url().path(),
                prior = attempt.prior_unauthorized(),
                "Received 401"
            );
            match self.handler.handle(&attempt).await {
                Ok(replay) => attempt = attempt.next(replay),
                Err(e) => {
                    info!(path = response.url().path(), reason = %e, "Returning 401 to caller");
                    return Ok(response);
                }
            }
        }
    }

    async fn send_raw(&self, request: Request) -> Result<Response> {
        self.http
            .inner()
            .execute(request)
            .await
            .map_err(Error::from_transport)
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("AuthenticatedClient")
            .field("base_url", &self.base_url.as_str())
            .field("interceptors", &names)
            .field("max_auth_attempts", &self.handler.max_attempts())
            .finish()
    }
}

/// Builder for [`AuthenticatedClient`]. Interceptors run in insertion order.
pub struct AuthenticatedClientBuilder {
    http: HttpClient,
    base_url: Url,
    interceptors: Vec<Arc<dyn Interceptor>>,
    handler: UnauthorizedHandler,
}

impl AuthenticatedClientBuilder {
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn build(self) -> AuthenticatedClient {
        AuthenticatedClient {
            http: self.http,
            base_url: self.base_url,
            interceptors: self.interceptors,
            handler: self.handler,
        }
    }
}
