//! Conditional GET helpers for responses built from cached values.
//!
//! # Examples
//!
//! ```
//! use http::{HeaderMap, HeaderValue, StatusCode, header};
//! use matchday_cache::http::{CacheControl, conditional_response};
//! use matchday_cache::{CacheStatus, CachedValue};
//!
//! let cached = CachedValue { value: "table", version: 3, status: CacheStatus::Hit };
//!
//! let mut request = HeaderMap::new();
//! request.insert(header::IF_NONE_MATCH, HeaderValue::from_static(r#"W/"season:42:table:3""#));
//!
//! let response = conditional_response(
//!     &request,
//!     "season:42:table",
//!     &cached,
//!     CacheControl::public(60, 300),
//! )
//! .unwrap();
//!
//! assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
//! assert_eq!(response.headers()[header::ETAG], r#"W/"season:42:table:3""#);
//! ```

use crate::client::CachedValue;
use crate::config::CacheOptions;
use crate::error::{CacheError, CacheResult};
use crate::etag::{build_weak_etag, matches_if_none_match};
use http::header::{CACHE_CONTROL, ETAG, HeaderName};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use std::fmt;

/// Response header mirroring the entry version.
pub const X_RESOURCE_VERSION: HeaderName = HeaderName::from_static("x-resource-version");

/// `Cache-Control` policy for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    /// Shared caches may store the response
    Public {
        /// `max-age` in seconds
        max_age: u64,
        /// `stale-while-revalidate` in seconds; omitted when zero
        stale_while_revalidate: u64,
    },
    /// Only the requesting client may store the response
    Private {
        /// `max-age` in seconds
        max_age: u64,
    },
}

impl CacheControl {
    /// Public policy, e.g. for season-wide tables.
    pub fn public(max_age: u64, stale_while_revalidate: u64) -> Self {
        CacheControl::Public {
            max_age,
            stale_while_revalidate,
        }
    }

    /// Private policy, e.g. for per-user views.
    pub fn private(max_age: u64) -> Self {
        CacheControl::Private { max_age }
    }

    /// Public policy mirroring the cache options of the entry.
    pub fn from_options(options: &CacheOptions) -> Self {
        Self::public(options.ttl_seconds(), options.swr_seconds())
    }

    /// Render as a header value.
    pub fn to_header_value(&self) -> HeaderValue {
        // Rendered from digits and ASCII directives only
        HeaderValue::from_str(&self.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheControl::Public {
                max_age,
                stale_while_revalidate: 0,
            } => write!(f, "public, max-age={}", max_age),
            CacheControl::Public {
                max_age,
                stale_while_revalidate,
            } => write!(
                f,
                "public, max-age={}, stale-while-revalidate={}",
                max_age, stale_while_revalidate
            ),
            CacheControl::Private { max_age } => write!(f, "private, max-age={}", max_age),
        }
    }
}

/// Validator headers for a cached value: `ETag`, `X-Resource-Version` and
/// `Cache-Control`.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if `key` cannot appear in a header.
pub fn cache_headers<T>(
    key: &str,
    cached: &CachedValue<T>,
    cache_control: CacheControl,
) -> CacheResult<HeaderMap> {
    let etag = build_weak_etag(key, cached.version);
    let etag = HeaderValue::from_str(&etag)
        .map_err(|e| CacheError::InvalidKey(format!("{}: {}", key, e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(ETAG, etag);
    headers.insert(X_RESOURCE_VERSION, HeaderValue::from(cached.version));
    headers.insert(CACHE_CONTROL, cache_control.to_header_value());
    Ok(headers)
}

/// What to send for a conditional GET.
#[derive(Debug, Clone)]
pub enum ConditionalResponse {
    /// The client copy is current: `304` with no body
    NotModified(HeaderMap),
    /// Send the value: `200` with a body
    Ok(HeaderMap),
}

impl ConditionalResponse {
    /// Status code to send.
    pub fn status(&self) -> StatusCode {
        match self {
            ConditionalResponse::NotModified(_) => StatusCode::NOT_MODIFIED,
            ConditionalResponse::Ok(_) => StatusCode::OK,
        }
    }

    /// Headers to send, identical for both outcomes.
    pub fn headers(&self) -> &HeaderMap {
        match self {
            ConditionalResponse::NotModified(headers) | ConditionalResponse::Ok(headers) => {
                headers
            }
        }
    }

    /// Whether the body must be omitted.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, ConditionalResponse::NotModified(_))
    }

    /// Build an `http::Response`, dropping `body` on `304`.
    pub fn into_response<B: Default>(self, body: B) -> Response<B> {
        let status = self.status();
        let (headers, body) = match self {
            ConditionalResponse::NotModified(headers) => (headers, B::default()),
            ConditionalResponse::Ok(headers) => (headers, body),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Decide between `304` and `200` for a GET served from the cache.
///
/// # Errors
///
/// Returns [`CacheError::InvalidKey`] if `key` cannot appear in a header.
pub fn conditional_response<T>(
    request_headers: &HeaderMap,
    key: &str,
    cached: &CachedValue<T>,
    cache_control: CacheControl,
) -> CacheResult<ConditionalResponse> {
    let headers = cache_headers(key, cached, cache_control)?;
    let etag = build_weak_etag(key, cached.version);

    if matches_if_none_match(request_headers, &etag) {
        Ok(ConditionalResponse::NotModified(headers))
    } else {
        Ok(ConditionalResponse::Ok(headers))
    }
}
