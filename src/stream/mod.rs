//! Chunked byte streams and their bridges to the host.
//!
//! [`ByteStream`] is the single stream type flowing through this crate. It is
//! produced from host streams ([`ByteStream::from_host`]), from blobs, from
//! user supplied [`Stream`]s, and it can be split into two independent readers
//! with [`ByteStream::tee`].
//!
//! ```rust
//! use isolate_fetch::ByteStream;
//!
//! # async fn example() -> Result<(), isolate_fetch::BodyError> {
//! let (left, right) = ByteStream::from_chunks(["a", "b"]).tee();
//! assert_eq!(left.collect_bytes().await?, "ab");
//! assert_eq!(right.collect_bytes().await?, "ab");
//! # Ok(())
//! # }
//! ```
mod inbound;
pub(crate) mod outbound;
pub(crate) mod shared;

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_lite::{ready, stream, Stream, StreamExt};
use pin_project_lite::pin_project;

use crate::host::{AnyHost, StreamId};
use crate::BodyError;

type BoxStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>>>>;

/// A single-reader stream of byte chunks.
pub struct ByteStream {
    pub(crate) inner: BoxStream,
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream")
    }
}

impl ByteStream {
    /// Wraps any stream of byte chunks.
    pub fn new<S, T, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + 'static,
        T: Into<Bytes> + 'static,
        E: Into<BodyError> + 'static,
    {
        Self {
            inner: Box::pin(stream.map(|chunk: Result<T, E>| -> Result<Bytes, BodyError> {
                chunk.map(Into::into).map_err(Into::into)
            })),
        }
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        Self {
            inner: Box::pin(stream::empty::<Result<Bytes, BodyError>>()),
        }
    }

    /// A stream yielding `bytes` as one chunk, or nothing when it is empty.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            inner: Box::pin(stream::once(Ok::<_, BodyError>(bytes))),
        }
    }

    /// A stream yielding each of `chunks` in order.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B> + 'static,
        I::IntoIter: 'static,
        B: Into<Bytes> + 'static,
    {
        Self {
            inner: Box::pin(
                stream::iter(chunks).map(|chunk: B| -> Result<Bytes, BodyError> { Ok(chunk.into()) }),
            ),
        }
    }

    /// Pulls `id` from `host` one `stream/readPart` at a time.
    pub fn from_host(host: AnyHost, id: StreamId) -> Self {
        inbound::pull(host, id)
    }

    /// Splits the stream into two readers that each see every chunk.
    ///
    /// Chunks are buffered only until both readers have passed them.
    pub fn tee(self) -> (ByteStream, ByteStream) {
        let shared = shared::SharedStream::new(self, false);
        (shared.reader(), shared.reader())
    }

    /// Reads the stream to its end.
    pub async fn collect_bytes(mut self) -> Result<Bytes, BodyError> {
        let mut first: Option<Bytes> = None;
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            match first.take() {
                None if buf.is_empty() => first = Some(chunk),
                Some(prev) => {
                    buf.extend_from_slice(&prev);
                    buf.extend_from_slice(&chunk);
                }
                None => buf.extend_from_slice(&chunk),
            }
        }
        Ok(first.unwrap_or_else(|| buf.freeze()))
    }

    /// Skips the first `skip` bytes and ends after `take` more.
    ///
    /// Ending short of `skip + take` bytes is an error.
    pub(crate) fn window(self, skip: u64, take: u64) -> Self {
        Self {
            inner: Box::pin(Window {
                inner: self,
                skip,
                remaining: take,
                expected: take,
            }),
        }
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl http_body::Body for ByteStream {
    type Data = Bytes;

    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx)
            .map(|opt| opt.map(|result| result.map(http_body::Frame::data)))
    }
}

pin_project! {
    struct Window {
        #[pin]
        inner: ByteStream,
        skip: u64,
        remaining: u64,
        expected: u64,
    }
}

impl Stream for Window {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.remaining == 0 {
                return Poll::Ready(None);
            }
            let Some(chunk) = ready!(this.inner.as_mut().poll_next(cx)) else {
                let received = *this.expected - *this.remaining;
                *this.remaining = 0;
                return Poll::Ready(Some(Err(BodyError::Truncated {
                    expected: *this.expected,
                    received,
                })));
            };
            let mut chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    *this.remaining = 0;
                    return Poll::Ready(Some(Err(err)));
                }
            };
            let len = chunk.len() as u64;
            if *this.skip >= len {
                *this.skip -= len;
                continue;
            }
            if *this.skip > 0 {
                chunk = chunk.slice(*this.skip as usize..);
                *this.skip = 0;
            }
            if chunk.len() as u64 > *this.remaining {
                chunk.truncate(*this.remaining as usize);
            }
            *this.remaining -= chunk.len() as u64;
            if !chunk.is_empty() {
                return Poll::Ready(Some(Ok(chunk)));
            }
        }
    }
}
