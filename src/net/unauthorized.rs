//! Reaction to `401 Unauthorized`: refresh once, replay once.

use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tracing::{debug, info, warn};

use super::interceptor::{bearer_header, bearer_token};
use crate::auth::{RefreshOutcome, TokenRefresher};
use crate::config::{MAX_AUTH_ATTEMPTS, RETRY_AUTH_HEADER};
use crate::error::{Error, Result};

/// A logical request and the number of 401s it has already received.
#[derive(Debug)]
pub struct RequestAttempt {
    request: Request,
    prior_unauthorized: u32,
}

impl RequestAttempt {
    pub fn new(request: Request) -> Self {
        Self::with_prior(request, 0)
    }

    pub fn with_prior(request: Request, prior_unauthorized: u32) -> Self {
        Self {
            request,
            prior_unauthorized,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn prior_unauthorized(&self) -> u32 {
        self.prior_unauthorized
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// The next attempt in the same chain, after one more 401.
    pub fn next(self, request: Request) -> Self {
        Self::with_prior(request, self.prior_unauthorized + 1)
    }
}

/// Decides whether a rejected request gets a refreshed token and a replay.
#[derive(Debug, Clone)]
pub struct UnauthorizedHandler {
    refresher: TokenRefresher,
    max_attempts: u32,
}

impl UnauthorizedHandler {
    pub fn new(refresher: TokenRefresher) -> Self {
        Self::with_max_attempts(refresher, MAX_AUTH_ATTEMPTS)
    }

    /// The standard pipeline stops at the `Retry-Auth` marker after one
    /// replay, so `max_attempts` only binds chains built with [`RequestAttempt::with_prior`].
    pub fn with_max_attempts(refresher: TokenRefresher, max_attempts: u32) -> Self {
        Self {
            refresher,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Produce the replay for a request that was answered with 401.
    ///
    /// Errors mean "no further request": the 401 stands.
    pub async fn handle(&self, attempt: &RequestAttempt) -> Result<Request> {
        let request = attempt.request();

        if attempt.prior_unauthorized() >= self.max_attempts {
            warn!(
                path = request.url().path(),
                attempts = attempt.prior_unauthorized(),
                "Authentication retry limit reached"
            );
            return Err(Error::RetryLimitExceeded {
                attempts: attempt.prior_unauthorized(),
            });
        }

        if has_retry_marker(request) {
            debug!(path = request.url().path(), "Already retried after refresh, giving up");
            return Err(Error::AlreadyRetried);
        }

        let token = match self.refresher.refresh_after_rejection(bearer_token(request)).await {
            RefreshOutcome::Success(token) if !token.is_empty() => token,
            RefreshOutcome::Success(_) => {
                return Err(Error::RefreshFailed("Refresh produced an empty token".into()));
            }
            RefreshOutcome::Failure(reason) => return Err(Error::RefreshFailed(reason)),
        };

        let Some(mut replay) = request.try_clone() else {
            debug!(path = request.url().path(), "Streaming body, cannot replay");
            return Err(Error::NotReplayable);
        };
        let Some(value) = bearer_header(&token) else {
            return Err(Error::RefreshFailed("Refreshed token is not a valid header value".into()));
        };
        let headers = replay.headers_mut();
        headers.insert(AUTHORIZATION, value);
        headers.insert(HeaderName::from_static(RETRY_AUTH_HEADER), HeaderValue::from_static("true"));

        info!(path = replay.url().path(), "Replaying request with refreshed token");
        Ok(replay)
    }
}

fn has_retry_marker(request: &Request) -> bool {
    request
        .headers()
        .get(RETRY_AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
