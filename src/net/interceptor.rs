//! Outbound request interceptors.

use std::sync::Arc;

use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialStore;
use crate::config::REQUEST_ID_HEADER;

/// Rewrites a request before it is sent. Applied once per logical request.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, request: Request) -> Request;

    fn name(&self) -> &str {
        "interceptor"
    }
}

/// Whether `url` addresses an authentication endpoint (any path segment
/// equal to `auth`).
pub fn is_auth_endpoint(url: &Url) -> bool {
    url.path_segments()
        .is_some_and(|mut segments| segments.any(|s| s == "auth"))
}

/// `Authorization: Bearer <token>` value, marked sensitive.
pub(crate) fn bearer_header(token: &str) -> Option<HeaderValue> {
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            warn!("Access token contains characters not allowed in a header");
            None
        }
    }
}

/// The token a request was sent with, if any.
pub(crate) fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Attaches the current access token to every non-auth request.
pub struct BearerAuthInterceptor {
    store: Arc<CredentialStore>,
}

impl BearerAuthInterceptor {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl Interceptor for BearerAuthInterceptor {
    fn intercept(&self, mut request: Request) -> Request {
        if is_auth_endpoint(request.url()) {
            return request;
        }
        let Some(token) = self.store.access_token() else {
            debug!(path = request.url().path(), "No access token available, sending without Authorization");
            return request;
        };
        if let Some(value) = bearer_header(&token) {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        request
    }

    fn name(&self) -> &str {
        "bearer_auth"
    }
}

/// Stamps an `x-request-id` on requests that do not carry one yet.
#[derive(Debug, Default)]
pub struct RequestIdInterceptor;

impl Interceptor for RequestIdInterceptor {
    fn intercept(&self, mut request: Request) -> Request {
        let name = HeaderName::from_static(REQUEST_ID_HEADER);
        if !request.headers().contains_key(&name) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.headers_mut().insert(name, value);
            }
        }
        request
    }

    fn name(&self) -> &str {
        "request_id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credential;
    use reqwest::Method;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    fn store_with(token: Option<&str>) -> Arc<CredentialStore> {
        Arc::new(CredentialStore::with_credential(Credential {
            access_token: token.map(String::from),
            refresh_token: Some("R1".into()),
            is_authenticated: token.is_some(),
            ..Default::default()
        }))
    }

    #[test]
    fn test_is_auth_endpoint() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(is_auth_endpoint(&url("http://h/auth/login")));
        assert!(is_auth_endpoint(&url("http://h/api/auth/refreshtoken")));
        assert!(!is_auth_endpoint(&url("http://h/dealers/auth-history")));
        assert!(!is_auth_endpoint(&url("http://h/authors")));
        assert!(!is_auth_endpoint(&url("http://h/pdi/12")));
    }

    #[test]
    fn test_bearer_attached() {
        let interceptor = BearerAuthInterceptor::new(store_with(Some("A1")));
        let request = interceptor.intercept(request("http://h/dealers"));
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer A1");
        assert!(request.headers()[AUTHORIZATION].is_sensitive());
        assert_eq!(bearer_token(&request), Some("A1"));
    }

    #[test]
    fn test_auth_endpoints_untouched() {
        let interceptor = BearerAuthInterceptor::new(store_with(Some("A1")));
        for url in ["http://h/auth/login", "http://h/auth/refreshtoken"] {
            let request = interceptor.intercept(request(url));
            assert!(request.headers().get(AUTHORIZATION).is_none(), "{url}");
        }
    }

    #[test]
    fn test_no_token_passes_through() {
        let interceptor = BearerAuthInterceptor::new(store_with(None));
        let request = interceptor.intercept(request("http://h/dealers"));
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_request_id_kept_when_present() {
        let interceptor = RequestIdInterceptor;
        let first = interceptor.intercept(request("http://h/cars"));
        let id = first.headers()[REQUEST_ID_HEADER].clone();
        assert_eq!(uuid::Uuid::parse_str(id.to_str().unwrap()).unwrap().get_version_num(), 4);

        let second = interceptor.intercept(first);
        assert_eq!(second.headers()[REQUEST_ID_HEADER], id);
    }
}
