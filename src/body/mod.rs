//! Request and response bodies.
//!
//! A [`Body`] is either absent (a *null* body), an in-memory literal, a
//! [`Blob`], or a one-shot [`ByteStream`]. Reading goes through the
//! consumption accessors ([`Body::bytes`], [`Body::text`], [`Body::json`],
//! [`Body::blob`], [`Body::form_data`]), each of which may be called once:
//!
//! - the first call moves the body to *reading* and, when it completes, to
//!   *consumed*;
//! - every later call fails with [`BodyError::BodyAlreadyConsumed`], including
//!   calls after a read that was dropped half way;
//! - a null body is never consumed and always yields the empty value.
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::{Body, BodyError};
//!
//! # async fn example() -> Result<(), BodyError> {
//! let mut body = Body::from_text("Hello world!");
//! assert_eq!(body.content_type(), Some("text/plain;charset=UTF-8"));
//! assert_eq!(body.text().await?.as_str(), "Hello world!");
//! assert!(matches!(body.text().await, Err(BodyError::BodyAlreadyConsumed)));
//!
//! let mut null = Body::empty();
//! assert!(null.bytes().await?.is_empty());
//! assert!(null.bytes().await?.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## JSON Handling
//!
//! ```rust
//! use isolate_fetch::Body;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User { name: String }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let body = Body::from_json(&User { name: "Alice".to_string() })?;
//! assert_eq!(body.content_type(), Some("application/json"));
//!
//! let mut body = Body::from_bytes(r#"{"name":"Bob"}"#);
//! let user: User = body.json().await?;
//! assert_eq!(user.name, "Bob");
//! # Ok(())
//! # }
//! ```
mod convert;
mod error_type;

pub use error_type::Error;

use core::fmt::Debug;
use core::mem::replace;

use bytes::Bytes;
use bytestr::ByteStr;

use crate::blob::Blob;
use crate::form_data::FormData;
use crate::host;
use crate::stream::ByteStream;

pub(crate) type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";

/// Consumption state of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// Nothing has been read yet.
    Unread,
    /// An accessor started reading and has not finished, or was dropped.
    Reading,
    /// An accessor finished, or the stream was handed to the host.
    Consumed,
}

enum BodyInner {
    Null,
    Once(Bytes),
    Blob(Blob),
    // `None` once the stream has been taken for sending.
    Stream(Option<ByteStream>),
}

/// The body of a [`Request`](crate::Request) or [`Response`](crate::Response).
pub struct Body {
    inner: BodyInner,
    state: BodyState,
    content_type: Option<String>,
    length: Option<u64>,
}

impl Debug for Body {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match &self.inner {
            BodyInner::Null => "null",
            BodyInner::Once(_) => "bytes",
            BodyInner::Blob(_) => "blob",
            BodyInner::Stream(_) => "stream",
        };
        f.debug_struct("Body")
            .field("kind", &kind)
            .field("state", &self.state)
            .field("length", &self.length)
            .finish()
    }
}

// What an accessor got hold of after passing the consumption check.
enum Source {
    Bytes(Bytes),
    Blob(Blob),
    Stream(ByteStream),
}

impl Source {
    async fn into_bytes(self) -> Result<Bytes, Error> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Blob(blob) => blob.bytes().await,
            Self::Stream(stream) => stream.collect_bytes().await,
        }
    }
}

impl Body {
    /// Creates a null body.
    ///
    /// A null body has no content type and no length, and every accessor
    /// returns the empty value any number of times.
    pub const fn empty() -> Self {
        Self {
            inner: BodyInner::Null,
            state: BodyState::Unread,
            content_type: None,
            length: None,
        }
    }

    /// Creates a body from raw bytes. No content type is implied.
    ///
    /// ```rust
    /// use isolate_fetch::Body;
    ///
    /// let body = Body::from_bytes(vec![1, 2, 3]);
    /// assert_eq!(body.len(), Some(3));
    /// assert_eq!(body.content_type(), None);
    /// ```
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            length: Some(data.len() as u64),
            inner: BodyInner::Once(data),
            state: BodyState::Unread,
            content_type: None,
        }
    }

    /// Creates a body from text, typed `text/plain;charset=UTF-8`.
    pub fn from_text(text: impl Into<ByteStr>) -> Self {
        let text: ByteStr = text.into();
        Self::from_bytes(Bytes::from(text)).with_content_type(TEXT_PLAIN)
    }

    /// Creates a body from a blob, inheriting its type when it has one.
    pub fn from_blob(blob: Blob) -> Self {
        let content_type = (!blob.content_type().is_empty()).then(|| blob.content_type().to_owned());
        Self {
            length: Some(blob.size()),
            inner: BodyInner::Blob(blob),
            state: BodyState::Unread,
            content_type,
        }
    }

    /// Creates a one-shot streaming body of unknown length.
    pub fn from_stream(stream: ByteStream) -> Self {
        Self {
            inner: BodyInner::Stream(Some(stream)),
            state: BodyState::Unread,
            content_type: None,
            length: None,
        }
    }

    /// Serializes `value` as JSON, typed `application/json`.
    pub fn from_json<T: serde::Serialize>(value: T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(&value)?;
        Ok(Self::from_bytes(bytes).with_content_type(mime::APPLICATION_JSON.as_ref()))
    }

    /// Serializes `value` as a URL-encoded form, typed
    /// `application/x-www-form-urlencoded;charset=UTF-8`.
    ///
    /// ```rust
    /// use isolate_fetch::Body;
    ///
    /// let body = Body::from_form(&[("q", "rust lang"), ("page", "2")]).unwrap();
    /// assert_eq!(
    ///     body.content_type(),
    ///     Some("application/x-www-form-urlencoded;charset=UTF-8")
    /// );
    /// ```
    #[cfg(feature = "form")]
    pub fn from_form<T: serde::Serialize>(value: T) -> Result<Self, serde_urlencoded::ser::Error> {
        let encoded = serde_urlencoded::to_string(value)?;
        Ok(Self::from_bytes(encoded)
            .with_content_type("application/x-www-form-urlencoded;charset=UTF-8"))
    }

    /// Encodes `form` as `multipart/form-data` using the current host.
    pub fn from_form_data(form: &FormData) -> crate::Result<Self> {
        let blob = form.encode()?;
        Ok(Self::from_blob(blob))
    }

    /// Overrides the content type this body suggests for its envelope.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declares the length of a streaming body.
    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// The content type implied by how the body was built.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The body length in bytes, when known.
    pub const fn len(&self) -> Option<u64> {
        self.length
    }

    /// Returns `Some(true)` when the body is known to be empty.
    pub const fn is_empty(&self) -> Option<bool> {
        match self.length {
            Some(length) => Some(length == 0),
            None => None,
        }
    }

    /// Returns `true` for a null body.
    pub const fn is_null(&self) -> bool {
        matches!(self.inner, BodyInner::Null)
    }

    /// Returns `true` for a streaming body.
    pub const fn is_stream(&self) -> bool {
        matches!(self.inner, BodyInner::Stream(_))
    }

    /// Returns `true` for a streaming body whose stream went to the host.
    pub(crate) fn stream_was_sent(&self) -> bool {
        matches!(self.inner, BodyInner::Stream(None))
    }

    /// The consumption state.
    pub const fn state(&self) -> BodyState {
        self.state
    }

    /// Returns `true` once any accessor has started reading.
    pub fn is_used(&self) -> bool {
        self.state != BodyState::Unread
    }

    // The consumption check every accessor passes through. `None` means null.
    fn begin(&mut self) -> Result<Option<Source>, Error> {
        if self.is_null() {
            return Ok(None);
        }
        if self.state != BodyState::Unread {
            return Err(Error::BodyAlreadyConsumed);
        }
        let source = match &mut self.inner {
            BodyInner::Null => return Ok(None),
            BodyInner::Once(bytes) => Source::Bytes(bytes.clone()),
            BodyInner::Blob(blob) => Source::Blob(blob.clone()),
            BodyInner::Stream(stream) => {
                Source::Stream(stream.take().ok_or(Error::BodyAlreadyConsumed)?)
            }
        };
        self.state = BodyState::Reading;
        Ok(Some(source))
    }

    fn finish<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        self.state = BodyState::Consumed;
        result
    }

    /// Reads the whole body.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        let Some(source) = self.begin()? else {
            return Ok(Bytes::new());
        };
        let result = source.into_bytes().await;
        self.finish(result)
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    pub async fn text(&mut self) -> Result<ByteStr, Error> {
        let bytes = self.bytes().await?;
        Ok(match ByteStr::from_utf8(bytes.clone()) {
            Ok(text) => text,
            Err(_) => ByteStr::from(String::from_utf8_lossy(&bytes).into_owned()),
        })
    }

    /// Reads the body and parses it as JSON.
    ///
    /// A null body parses as JSON `null`, so `Option<T>` and `()` succeed on it.
    pub async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, Error> {
        if self.is_null() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads the body into a [`Blob`] typed by this body's content type.
    ///
    /// Blob bodies are returned without copying; other bodies are read into
    /// a host buffer of the current host.
    pub async fn blob(&mut self) -> Result<Blob, Error> {
        let content_type = self.content_type.clone().unwrap_or_default();
        let Some(source) = self.begin()? else {
            return Ok(Blob::empty());
        };
        let result = match source {
            Source::Blob(blob) => Ok(blob),
            other => match other.into_bytes().await {
                Ok(bytes) => blob_from_bytes(bytes),
                Err(err) => Err(err),
            },
        };
        self.finish(result.map(|blob| blob.with_type(&content_type)))
    }

    /// Reads the body and decodes it as form fields according to `content_type`.
    ///
    /// A null body yields an empty field list regardless of the type.
    pub async fn form_data(&mut self, content_type: Option<&str>) -> crate::Result<FormData> {
        if self.is_null() {
            return Ok(FormData::new());
        }
        let blob = self.blob().await?;
        FormData::decode(&blob, content_type).await
    }

    /// Duplicates the body.
    ///
    /// Literal and blob bodies are shared; a streaming body is split with
    /// [`ByteStream::tee`] and this body keeps one half.
    pub fn try_clone(&mut self) -> Result<Body, Error> {
        if self.is_used() && !self.is_null() {
            return Err(Error::BodyAlreadyConsumed);
        }
        let inner = match &mut self.inner {
            BodyInner::Null => BodyInner::Null,
            BodyInner::Once(bytes) => BodyInner::Once(bytes.clone()),
            BodyInner::Blob(blob) => BodyInner::Blob(blob.clone()),
            BodyInner::Stream(stream) => {
                let (mine, theirs) = stream.take().ok_or(Error::BodyAlreadyConsumed)?.tee();
                *stream = Some(mine);
                BodyInner::Stream(Some(theirs))
            }
        };
        Ok(Body {
            inner,
            state: BodyState::Unread,
            content_type: self.content_type.clone(),
            length: self.length,
        })
    }

    /// Produces the stream to hand to the host for one dispatch.
    ///
    /// Literal and blob bodies can be sent any number of times. A streaming
    /// body is taken on the first call, which consumes it.
    pub(crate) fn take_for_send(&mut self) -> Result<Option<ByteStream>, Error> {
        if self.is_null() {
            return Ok(None);
        }
        if self.is_used() {
            return Err(Error::BodyAlreadyConsumed);
        }
        match &mut self.inner {
            BodyInner::Null => Ok(None),
            BodyInner::Once(bytes) => Ok(Some(ByteStream::from_bytes(bytes.clone()))),
            BodyInner::Blob(blob) => Ok(Some(blob.stream())),
            BodyInner::Stream(stream) => {
                let stream = stream.take().ok_or(Error::BodyAlreadyConsumed)?;
                self.state = BodyState::Consumed;
                Ok(Some(stream))
            }
        }
    }

    /// Replaces this body with a null one and returns the previous body.
    pub fn take(&mut self) -> Body {
        replace(self, Body::empty())
    }

    /// Converts the body into a stream without the consumption check.
    pub fn into_stream(self) -> ByteStream {
        match self.inner {
            BodyInner::Null => ByteStream::empty(),
            BodyInner::Once(bytes) => ByteStream::from_bytes(bytes),
            BodyInner::Blob(blob) => blob.stream(),
            BodyInner::Stream(Some(stream)) => stream,
            BodyInner::Stream(None) => ByteStream::new(futures_lite::stream::once(
                Err::<Bytes, _>(Error::BodyAlreadyConsumed),
            )),
        }
    }
}

fn blob_from_bytes(bytes: Bytes) -> Result<Blob, Error> {
    let host = host::current()?;
    Ok(Blob::with_host(&host, [bytes], "")?)
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;
    use serde::{Deserialize, Serialize};

    #[tokio::test]
    async fn basic_body_operations() {
        let empty = Body::empty();
        assert_eq!(empty.len(), None);
        assert!(empty.is_null());
        assert!(!empty.is_used());

        let mut text_body = Body::from_bytes("Hello, World!");
        assert_eq!(text_body.len(), Some(13));
        assert_eq!(text_body.is_empty(), Some(false));

        let result = text_body.bytes().await.unwrap();
        assert_eq!(result.as_ref(), b"Hello, World!");
        assert_eq!(text_body.state(), BodyState::Consumed);
    }

    #[tokio::test]
    async fn second_read_fails() {
        let mut body = Body::from_text("once");
        assert_eq!(body.text().await.unwrap().as_str(), "once");
        assert!(matches!(body.bytes().await, Err(Error::BodyAlreadyConsumed)));
        assert!(matches!(body.try_clone(), Err(Error::BodyAlreadyConsumed)));
    }

    #[tokio::test]
    async fn null_body_rereads() {
        let mut body = Body::empty();
        for _ in 0..3 {
            assert!(body.bytes().await.unwrap().is_empty());
            assert_eq!(body.text().await.unwrap().as_str(), "");
            assert!(body.blob().await.unwrap().is_empty());
            let value: serde_json::Value = body.json().await.unwrap();
            assert!(value.is_null());
        }
        assert!(!body.is_used());
    }

    #[tokio::test]
    async fn dropped_read_leaves_body_reading() {
        use core::future::Future;
        use core::task::{Context, Waker};

        let mut body = Body::from_stream(ByteStream::new(
            futures_lite::stream::pending::<Result<Bytes, Error>>(),
        ));
        {
            let mut read = core::pin::pin!(body.bytes());
            let mut cx = Context::from_waker(Waker::noop());
            assert!(read.as_mut().poll(&mut cx).is_pending());
        }
        assert_eq!(body.state(), BodyState::Reading);
        assert!(matches!(body.bytes().await, Err(Error::BodyAlreadyConsumed)));
    }

    #[tokio::test]
    async fn stream_clone_is_independent() {
        let mut original = Body::from_stream(ByteStream::from_chunks(["ab", "cd"]));
        let mut copy = original.try_clone().unwrap();
        assert_eq!(copy.bytes().await.unwrap(), "abcd");
        assert_eq!(original.bytes().await.unwrap(), "abcd");
    }

    #[tokio::test]
    async fn send_takes_stream_once() {
        let mut body = Body::from_stream(ByteStream::from_bytes("x"));
        assert!(body.take_for_send().unwrap().is_some());
        assert!(body.stream_was_sent());
        assert!(body.take_for_send().is_err());

        let mut literal = Body::from_bytes("y");
        assert!(literal.take_for_send().unwrap().is_some());
        assert!(literal.take_for_send().unwrap().is_some());
        assert!(!literal.is_used());
    }

    #[tokio::test]
    async fn json_roundtrip() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct TestData {
            message: String,
            count: u32,
        }

        let data = TestData {
            message: "hi".to_owned(),
            count: 2,
        };
        let mut body = Body::from_json(&data).unwrap();
        assert_eq!(body.content_type(), Some("application/json"));
        let back: TestData = body.json().await.unwrap();
        assert_eq!(back, data);

        let mut bad = Body::from_bytes("{");
        let err = bad.json::<TestData>().await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[tokio::test]
    async fn blob_accessor_uses_host_and_type() {
        let host = LocalHost::new();
        let blob = host
            .run(async {
                Body::from_bytes("abc")
                    .with_content_type("Text/CSV")
                    .blob()
                    .await
            })
            .await
            .unwrap();
        assert_eq!(blob.size(), 3);
        assert_eq!(blob.content_type(), "text/csv");
        assert_eq!(host.buffer_count(), 1);
    }

    #[tokio::test]
    async fn text_is_lossy() {
        let mut body = Body::from_bytes(vec![b'o', b'k', 0xff]);
        assert_eq!(body.text().await.unwrap().as_str(), "ok\u{fffd}");
    }
}
