//! Errors.
//!
//! Everything fallible in this crate ends in one boxed [`Error`]:
//!
//! - [`Error`] - The error type returned by every fallible operation in this crate
//! - [`ErrorKind`] - The coarse category an error belongs to
//! - [`Result`] - A specialized Result type alias
//! - [`ResultExt`] - Extension trait that attaches an [`ErrorKind`] to foreign errors
//!
//! Component errors ([`BodyError`](crate::BodyError),
//! [`RedirectError`](crate::redirect::RedirectError),
//! [`BoundaryError`](crate::host::BoundaryError), [`ConstructionError`]) convert
//! into [`Error`] with `?` and can be recovered with [`Error::downcast_ref`].
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::{Error, ErrorKind, Result, ResultExt};
//!
//! let err = Error::msg("bad input").set_kind(ErrorKind::Construction);
//! assert_eq!(err.kind(), ErrorKind::Construction);
//!
//! let parsed: Result<u16> = "600x".parse::<u16>().kind(ErrorKind::Construction);
//! assert!(parsed.is_err());
//! ```
use core::fmt::{self, Debug};
use core::ops::Deref;

use http::StatusCode;

/// Coarse classification of every error this crate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Raised synchronously while building a value: bad status, bad URL,
    /// a body where none is allowed, a malformed content type.
    Construction,
    /// A one-shot body was read twice.
    Consumption,
    /// A body was read but its content could not be interpreted.
    Decode,
    /// The redirect pipeline gave up.
    Redirect,
    /// Cancellation was observed before the next hop.
    Aborted,
    /// The host boundary reported a failure.
    Boundary,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Construction => "construction",
            Self::Consumption => "consumption",
            Self::Decode => "decode",
            Self::Redirect => "redirect",
            Self::Aborted => "aborted",
            Self::Boundary => "boundary",
        })
    }
}

/// Trait for errors that know which [`ErrorKind`] they belong to.
///
/// Only types implementing this trait can be directly converted into [`Error`]
/// via the `From` implementation. For other errors use [`ResultExt::kind`].
pub trait FetchError: core::error::Error + Send + Sync + 'static {
    /// Returns the category of this error.
    fn kind(&self) -> ErrorKind;
}

/// The error type returned by fallible operations of this crate.
pub struct Error {
    error: Box<dyn FetchError>,
}

#[derive(Debug)]
struct MsgError<M: fmt::Display + fmt::Debug + Send + Sync + 'static> {
    msg: M,
}

#[derive(Debug)]
struct WithKind<E: core::error::Error + Send + Sync + 'static> {
    kind: ErrorKind,
    error: Box<E>,
}

struct OverrideKind {
    kind: ErrorKind,
    inner: Box<dyn FetchError>,
}

impl<M: fmt::Display + fmt::Debug + Send + Sync + 'static> core::error::Error for MsgError<M> {}

impl<M: fmt::Display + fmt::Debug + Send + Sync + 'static> fmt::Display for MsgError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.msg, f)
    }
}

impl<E: core::error::Error + Send + Sync + 'static> fmt::Display for WithKind<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<E: core::error::Error + Send + Sync + 'static> core::error::Error for WithKind<E> {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        self.error.source()
    }
}

impl<E: core::error::Error + Send + Sync + 'static> FetchError for WithKind<E> {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Debug for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl core::error::Error for OverrideKind {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        self.inner.source()
    }
}

impl FetchError for OverrideKind {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Wraps any error with the given kind.
    pub fn new<E>(error: E, kind: ErrorKind) -> Self
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        Self {
            error: Box::new(WithKind {
                kind,
                error: Box::new(error),
            }),
        }
    }

    /// Creates an error from a message. The kind defaults to [`ErrorKind::Boundary`],
    /// since free-form messages almost always come from a host implementation.
    pub fn msg<M>(msg: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(MsgError { msg }, ErrorKind::Boundary)
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Replaces the kind of this error.
    pub fn set_kind(self, kind: ErrorKind) -> Self {
        Self {
            error: Box::new(OverrideKind {
                kind,
                inner: self.error,
            }),
        }
    }

    /// Attempts to downcast the inner error to a concrete type.
    ///
    /// Returns `Err(self)` unchanged when the inner error is of another type.
    pub fn downcast<E: FetchError>(self) -> core::result::Result<Box<E>, Self> {
        if self.downcast_ref::<E>().is_some() {
            let error = self.error as Box<dyn core::error::Error + Send + Sync + 'static>;
            error.downcast::<E>().map_err(|_| unreachable!())
        } else {
            Err(self)
        }
    }

    /// Attempts to downcast the inner error to a reference of the concrete type.
    ///
    /// ```rust
    /// use isolate_fetch::{BodyError, Error};
    ///
    /// let err: Error = BodyError::BodyAlreadyConsumed.into();
    /// assert!(matches!(
    ///     err.downcast_ref::<BodyError>(),
    ///     Some(BodyError::BodyAlreadyConsumed)
    /// ));
    /// ```
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: core::error::Error + Send + Sync + 'static,
    {
        let error: &(dyn core::error::Error + Send + Sync + 'static) = &*self.error;
        error.downcast_ref()
    }

    /// Consumes this error and returns the inner [`FetchError`] trait object.
    pub fn into_inner(self) -> Box<dyn FetchError> {
        self.error
    }

    /// Suggests an HTTP status for surfacing this error to a caller that speaks HTTP.
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Construction | ErrorKind::Decode => StatusCode::BAD_REQUEST,
            ErrorKind::Consumption => StatusCode::CONFLICT,
            ErrorKind::Redirect | ErrorKind::Boundary => StatusCode::BAD_GATEWAY,
            ErrorKind::Aborted => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl<E: FetchError> From<E> for Error {
    fn from(error: E) -> Self {
        Self {
            error: Box::new(error),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.error, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl Deref for Error {
    type Target = dyn FetchError;

    fn deref(&self) -> &Self::Target {
        self.error.as_ref()
    }
}

impl AsRef<dyn FetchError> for Error {
    fn as_ref(&self) -> &dyn FetchError {
        self.deref()
    }
}

/// Errors raised while constructing requests, responses and their parts.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConstructionError {
    /// A response status outside `200..=599`, or a non-redirect status given
    /// to [`Response::redirect`](crate::Response::redirect).
    InvalidStatus(u16),
    /// A reason phrase containing CR or LF.
    InvalidStatusText(String),
    /// The URL could not be parsed.
    InvalidUrl(String),
    /// The URL parsed but cannot be fetched (non-http scheme, embedded credentials).
    UnsupportedUrl(String),
    /// A GET or HEAD request was given a body.
    BodyNotAllowed(http::Method),
    /// A null-body status (101, 103, 204, 205, 304) was given a body.
    NullBodyStatus(u16),
    /// A header name or value was rejected.
    InvalidHeader(String),
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatus(status) => write!(f, "invalid status code {status}"),
            Self::InvalidStatusText(text) => write!(f, "invalid status text {text:?}"),
            Self::InvalidUrl(url) => write!(f, "invalid URL {url:?}"),
            Self::UnsupportedUrl(reason) => write!(f, "unsupported URL: {reason}"),
            Self::BodyNotAllowed(method) => {
                write!(f, "request with {method} method cannot have a body")
            }
            Self::NullBodyStatus(status) => {
                write!(f, "response with status {status} cannot have a body")
            }
            Self::InvalidHeader(reason) => write!(f, "invalid header: {reason}"),
        }
    }
}

impl core::error::Error for ConstructionError {}

impl FetchError for ConstructionError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Construction
    }
}

/// Extension trait that attaches an [`ErrorKind`] to `Result` and `Option` values.
///
/// ```rust
/// use isolate_fetch::{ErrorKind, Result, ResultExt};
///
/// fn port(raw: &str) -> Result<u16> {
///     raw.parse::<u16>().kind(ErrorKind::Construction)
/// }
///
/// fn first(items: &[u8]) -> Result<u8> {
///     items.first().copied().kind(ErrorKind::Decode)
/// }
/// # assert!(port("80").is_ok());
/// # assert!(first(&[]).is_err());
/// ```
pub trait ResultExt<T>
where
    Self: Sized,
{
    /// Converts the error (or `None`) into an [`Error`] of the given kind.
    fn kind(self, kind: ErrorKind) -> Result<T>;
}

impl<T, E> ResultExt<T> for core::result::Result<T, E>
where
    E: core::error::Error + Send + Sync + 'static,
{
    fn kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|error| Error::new(error, kind))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn kind(self, kind: ErrorKind) -> Result<T> {
        self.ok_or_else(|| Error::msg("None Error").set_kind(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BodyError;

    #[test]
    fn kind_follows_component_error() {
        let err: Error = BodyError::BodyAlreadyConsumed.into();
        assert_eq!(err.kind(), ErrorKind::Consumption);
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: Error = ConstructionError::InvalidStatus(99).into();
        assert_eq!(err.kind(), ErrorKind::Construction);
        assert_eq!(err.to_string(), "invalid status code 99");
    }

    #[test]
    fn override_keeps_message() {
        let err = Error::msg("host went away").set_kind(ErrorKind::Aborted);
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(err.to_string(), "host went away");
    }

    #[test]
    fn downcast_roundtrip() {
        let err: Error = ConstructionError::NullBodyStatus(204).into();
        assert!(err.downcast_ref::<BodyError>().is_none());
        let err = err.downcast::<BodyError>().unwrap_err();
        let inner = err.downcast::<ConstructionError>().unwrap();
        assert!(matches!(*inner, ConstructionError::NullBodyStatus(204)));
    }

    #[test]
    fn option_ext() {
        let none: Option<u8> = None;
        let err = none.kind(ErrorKind::Decode).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
