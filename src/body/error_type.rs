use core::error::Error as coreError;
use core::fmt::Display;

use super::BoxError;
use crate::error::{ErrorKind, FetchError};
use crate::host::BoundaryError;

/// Error type for body operations.
///
/// Covers one-shot consumption, decoding of the body content and failures
/// of the stream or host underneath.
///
/// # Examples
///
/// ```rust
/// use isolate_fetch::{BodyError, ErrorKind};
/// use isolate_fetch::error::FetchError;
///
/// fn describe(err: &BodyError) -> &'static str {
///     match err {
///         BodyError::BodyAlreadyConsumed => "read twice",
///         BodyError::Json(_) => "bad json",
///         _ => "other",
///     }
/// }
///
/// assert_eq!(describe(&BodyError::BodyAlreadyConsumed), "read twice");
/// assert_eq!(BodyError::BodyAlreadyConsumed.kind(), ErrorKind::Consumption);
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The body was already read, is being read, or was handed to the host.
    BodyAlreadyConsumed,
    /// The body is not valid JSON for the requested type.
    Json(serde_json::Error),
    /// The body could not be decoded as form data.
    ///
    /// Raised for a missing or unparseable content type, or one that is
    /// neither `multipart/form-data` nor `application/x-www-form-urlencoded`.
    MalformedBody(String),
    /// A stream-backed blob ended before its declared size.
    Truncated {
        /// The size the blob was created with.
        expected: u64,
        /// The bytes actually produced.
        received: u64,
    },
    /// A failure observed through a shared stream by a reader other than the
    /// first one. Keeps the kind of the original error.
    Stream {
        /// Display form of the original error.
        message: String,
        /// Kind of the original error.
        kind: ErrorKind,
    },
    /// The host failed while producing the body.
    Boundary(BoundaryError),
    /// Form serialization failed.
    #[cfg(feature = "form")]
    SerializeForm(serde_urlencoded::ser::Error),
    /// Any other error raised by a user supplied stream.
    Other(BoxError),
}

impl Error {
    /// Produces a copy suitable for handing to another reader of the same stream.
    pub(crate) fn share(&self) -> Self {
        Self::Stream {
            message: self.to_string(),
            kind: self.kind(),
        }
    }
}

impl FetchError for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::BodyAlreadyConsumed => ErrorKind::Consumption,
            Self::MalformedBody(_) => ErrorKind::Construction,
            #[cfg(feature = "form")]
            Self::SerializeForm(_) => ErrorKind::Construction,
            Self::Json(_) | Self::Truncated { .. } | Self::Other(_) => ErrorKind::Decode,
            Self::Stream { kind, .. } => *kind,
            Self::Boundary(_) => ErrorKind::Boundary,
        }
    }
}

macro_rules! impl_body_error {
    ($(($field:tt,$ty:ty $(,$feature:tt)?)),*) => {
        $(
            $(#[cfg(feature = $feature)])*
            impl From<$ty> for Error {
                fn from(error: $ty) -> Self {
                    Self::$field(error)
                }
            }
        )*

        impl Display for Error {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $(#[cfg(feature = $feature)])*
                        Self::$field(error) => error.fmt(f),
                    )*
                    Self::BodyAlreadyConsumed => f.write_str("body has already been consumed"),
                    Self::MalformedBody(reason) => write!(f, "malformed body: {reason}"),
                    Self::Truncated { expected, received } => write!(
                        f,
                        "stream ended after {received} of {expected} bytes"
                    ),
                    Self::Stream { message, .. } => f.write_str(message),
                    Self::Other(error) => error.fmt(f),
                }
            }
        }

        impl coreError for Error {
            fn source(&self) -> Option<&(dyn coreError + 'static)> {
                match self {
                    $(
                        $(#[cfg(feature = $feature)])*
                        Self::$field(error) => Some(error),
                    )*
                    Self::Other(error) => error.source(),
                    _ => None,
                }
            }
        }
    };
}

impl_body_error![
    (Json, serde_json::Error),
    (Boundary, BoundaryError),
    (SerializeForm, serde_urlencoded::ser::Error, "form")
];

impl From<BoxError> for Error {
    fn from(error: BoxError) -> Self {
        Self::Other(error)
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(error: core::convert::Infallible) -> Self {
        match error {}
    }
}
