//! Security headers middleware — adds common security-related HTTP headers
//! to every response.
//!
//! # Default headers
//!
//! | Header | Value |
//! |--------|-------|
//! | `X-Content-Type-Options` | `nosniff` |
//! | `X-Frame-Options` | `DENY` |
//! | `Strict-Transport-Security` | `max-age=31536000; includeSubDomains` |
//! | `X-XSS-Protection` | `0` |
//! | `Referrer-Policy` | `strict-origin-when-cross-origin` |
//!
//! # Usage
//!
//! ```ignore
//! let router = Router::new().layer(SecureHeadersLayer::new(SecureHeaders::default()));
//!
//! // Custom configuration
//! let headers = SecureHeaders::builder()
//!     .hsts_max_age(63072000)
//!     .frame_options("SAMEORIGIN")
//!     .content_security_policy("default-src 'self'")
//!     .build();
//! let router = Router::new().layer(SecureHeadersLayer::new(headers));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};

/// Collected set of security headers to stamp onto every response.
///
/// Use `SecureHeaders::default()` for sensible defaults, or
/// `SecureHeaders::builder()` for custom configuration.
#[derive(Clone)]
pub struct SecureHeaders {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl SecureHeaders {
    /// Create a builder for custom header configuration.
    pub fn builder() -> SecureHeadersBuilder {
        SecureHeadersBuilder::new()
    }

    /// Returns a reference to the collected headers.
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }
}

impl Default for SecureHeaders {
    fn default() -> Self {
        SecureHeadersBuilder::new().build()
    }
}

/// Tower layer applying [`SecureHeaders`] to outgoing responses.
#[derive(Clone)]
pub struct SecureHeadersLayer {
    headers: SecureHeaders,
}

impl SecureHeadersLayer {
    pub fn new(headers: SecureHeaders) -> Self {
        Self { headers }
    }
}

impl<S> Layer<S> for SecureHeadersLayer {
    type Service = SecureHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecureHeadersService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecureHeadersService<S> {
    inner: S,
    headers: SecureHeaders,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SecureHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let headers = self.headers.clone();
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            for (name, value) in headers.headers().iter() {
                response.headers_mut().insert(name.clone(), value.clone());
            }
            Ok(response)
        })
    }
}

/// Builder for [`SecureHeaders`].
pub struct SecureHeadersBuilder {
    content_type_options: bool,
    frame_options: Option<String>,
    hsts: bool,
    hsts_max_age: u64,
    hsts_include_subdomains: bool,
    xss_protection: bool,
    referrer_policy: Option<String>,
    content_security_policy: Option<String>,
    permissions_policy: Option<String>,
}

impl SecureHeadersBuilder {
    fn new() -> Self {
        Self {
            content_type_options: true,
            frame_options: Some("DENY".to_string()),
            hsts: true,
            hsts_max_age: 31536000,
            hsts_include_subdomains: true,
            xss_protection: true,
            referrer_policy: Some("strict-origin-when-cross-origin".to_string()),
            content_security_policy: None,
            permissions_policy: None,
        }
    }

    /// Enable or disable `X-Content-Type-Options: nosniff`.
    pub fn content_type_options(mut self, enabled: bool) -> Self {
        self.content_type_options = enabled;
        self
    }

    /// Set the `X-Frame-Options` value (e.g. `"DENY"`, `"SAMEORIGIN"`).
    pub fn frame_options(mut self, value: impl Into<String>) -> Self {
        self.frame_options = Some(value.into());
        self
    }

    /// Disable `X-Frame-Options`.
    pub fn no_frame_options(mut self) -> Self {
        self.frame_options = None;
        self
    }

    /// Enable or disable `Strict-Transport-Security`.
    pub fn hsts(mut self, enabled: bool) -> Self {
        self.hsts = enabled;
        self
    }

    /// Set the `max-age` value for HSTS (in seconds).
    pub fn hsts_max_age(mut self, seconds: u64) -> Self {
        self.hsts_max_age = seconds;
        self
    }

    /// Enable or disable `includeSubDomains` in the HSTS header.
    pub fn hsts_include_subdomains(mut self, include: bool) -> Self {
        self.hsts_include_subdomains = include;
        self
    }

    /// Enable or disable the `X-XSS-Protection` header.
    pub fn xss_protection(mut self, enabled: bool) -> Self {
        self.xss_protection = enabled;
        self
    }

    /// Set `Referrer-Policy`.
    pub fn referrer_policy(mut self, value: impl Into<String>) -> Self {
        self.referrer_policy = Some(value.into());
        self
    }

    /// Set `Content-Security-Policy`.
    pub fn content_security_policy(mut self, value: impl Into<String>) -> Self {
        self.content_security_policy = Some(value.into());
        self
    }

    /// Set `Permissions-Policy`.
    pub fn permissions_policy(mut self, value: impl Into<String>) -> Self {
        self.permissions_policy = Some(value.into());
        self
    }

    /// Build the [`SecureHeaders`] header set.
    pub fn build(self) -> SecureHeaders {
        let mut headers = Vec::new();

        if self.content_type_options {
            headers.push((
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ));
        }

        if let Some(ref fo) = self.frame_options {
            if let Ok(val) = HeaderValue::from_str(fo) {
                headers.push((HeaderName::from_static("x-frame-options"), val));
            }
        }

        if self.hsts {
            let value = if self.hsts_include_subdomains {
                format!("max-age={}; includeSubDomains", self.hsts_max_age)
            } else {
                format!("max-age={}", self.hsts_max_age)
            };
            if let Ok(val) = HeaderValue::from_str(&value) {
                headers.push((HeaderName::from_static("strict-transport-security"), val));
            }
        }

        if self.xss_protection {
            headers.push((
                HeaderName::from_static("x-xss-protection"),
                HeaderValue::from_static("0"),
            ));
        }

        if let Some(ref rp) = self.referrer_policy {
            if let Ok(val) = HeaderValue::from_str(rp) {
                headers.push((HeaderName::from_static("referrer-policy"), val));
            }
        }

        if let Some(ref csp) = self.content_security_policy {
            if let Ok(val) = HeaderValue::from_str(csp) {
                headers.push((HeaderName::from_static("content-security-policy"), val));
            }
        }

        if let Some(ref pp) = self.permissions_policy {
            if let Ok(val) = HeaderValue::from_str(pp) {
                headers.push((HeaderName::from_static("permissions-policy"), val));
            }
        }

        SecureHeaders {
            headers: Arc::new(headers),
        }
    }
}
