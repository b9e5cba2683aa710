//! HTTP plumbing: base client, interceptors, 401 handling, the
//! authenticated pipeline.

pub mod client;
pub mod interceptor;
pub mod pipeline;
pub mod unauthorized;

pub use client::{HttpClient, HttpClientBuilder};
pub use interceptor::{BearerAuthInterceptor, Interceptor, RequestIdInterceptor, is_auth_endpoint};
pub use pipeline::{AuthenticatedClient, AuthenticatedClientBuilder};
pub use unauthorized::{RequestAttempt, UnauthorizedHandler};
