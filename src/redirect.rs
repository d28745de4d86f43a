//! Redirect policy and the rewrite rules applied between hops.
//!
//! The loop itself lives in [`Client::fetch`](crate::Client::fetch); this
//! module decides what a redirect response means for the next request:
//!
//! | status      | method          | next hop                      |
//! |-------------|-----------------|-------------------------------|
//! | 301, 302    | `POST`          | `GET`, body and body headers dropped |
//! | 303         | not `GET`/`HEAD`| `GET`, body and body headers dropped |
//! | 307, 308    | any             | unchanged, body re-sent       |
//!
//! A hop to another origin also drops `Authorization`.
use core::fmt;

use http::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_LOCATION,
    CONTENT_TYPE, LOCATION, REFERRER_POLICY,
};
use http::{HeaderMap, HeaderName, Method};
use url::Url;

use crate::error::{ErrorKind, FetchError};
use crate::{Body, Request};

/// What to do when a response is a redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RedirectPolicy {
    /// Follow up to the client's hop limit.
    #[default]
    Follow,
    /// Fail with [`RedirectError::RedirectAttempted`].
    Error,
    /// Return the redirect response as is.
    Manual,
}

/// Errors raised by the redirect pipeline.
#[derive(Debug)]
#[non_exhaustive]
pub enum RedirectError {
    /// The policy was [`RedirectPolicy::Error`] and the server redirected.
    RedirectAttempted {
        /// The redirect status.
        status: u16,
    },
    /// More redirects than the client allows.
    TooManyRedirects {
        /// The limit that was exceeded.
        limit: u32,
    },
    /// The request body was a stream that already went to the host, and the
    /// redirect would need to send it again.
    StreamBodyAlreadyConsumed,
    /// The `Location` header is not a usable http(s) URL.
    InvalidLocation(String),
}

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedirectAttempted { status } => {
                write!(f, "redirect ({status}) attempted with redirect policy \"error\"")
            }
            Self::TooManyRedirects { limit } => write!(f, "more than {limit} redirects"),
            Self::StreamBodyAlreadyConsumed => {
                f.write_str("cannot follow redirect with a streaming body that was already sent")
            }
            Self::InvalidLocation(location) => write!(f, "invalid redirect location {location:?}"),
        }
    }
}

impl core::error::Error for RedirectError {}

impl FetchError for RedirectError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Redirect
    }
}

const BODY_HEADERS: [HeaderName; 5] = [
    CONTENT_ENCODING,
    CONTENT_LANGUAGE,
    CONTENT_LOCATION,
    CONTENT_TYPE,
    CONTENT_LENGTH,
];

/// Whether `status` is one of 301, 302, 303, 307, 308.
pub fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Resolves the `Location` header against `base`. `None` when there is no
/// `Location`.
pub(crate) fn location(headers: &HeaderMap, base: &Url) -> Result<Option<Url>, RedirectError> {
    let Some(raw) = headers.get(LOCATION) else {
        return Ok(None);
    };
    let raw = String::from_utf8_lossy(raw.as_bytes());
    let next = base
        .join(&raw)
        .map_err(|_| RedirectError::InvalidLocation(raw.clone().into_owned()))?;
    if !matches!(next.scheme(), "http" | "https") {
        return Err(RedirectError::InvalidLocation(raw.into_owned()));
    }
    Ok(Some(next))
}

/// Whether following `status` turns the request into a bodiless `GET`.
pub(crate) fn downgrades(status: u16, method: &Method) -> bool {
    match status {
        301 | 302 => method == Method::POST,
        303 => method != Method::GET && method != Method::HEAD,
        _ => false,
    }
}

/// Rewrites `request` for the hop to `next` after a redirect `status`
/// carrying `response_headers`.
pub(crate) fn rewrite(request: &mut Request, status: u16, response_headers: &HeaderMap, next: Url) {
    if downgrades(status, request.method()) {
        request.set_method(Method::GET);
        request.replace_body(Body::empty());
        for name in &BODY_HEADERS {
            request.headers_mut().remove(name);
        }
    }

    if request.url().origin() != next.origin() {
        request.headers_mut().remove(AUTHORIZATION);
    }

    if let Some(policy) = response_headers.get(REFERRER_POLICY) {
        if !policy.is_empty() {
            request
                .headers_mut()
                .insert(REFERRER_POLICY, policy.clone());
        }
    }

    request.set_url(next);
}
