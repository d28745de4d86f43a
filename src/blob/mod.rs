//! Immutable, sliceable byte containers.
//!
//! A [`Blob`] is an ordered list of backing references plus a size and a type.
//! Literal content lives in host buffers; content of a known size can also be
//! backed by a stream, which is pulled lazily and kept for later reads.
//!
//! Slicing is exact and copy free: the result references the same buffers and
//! streams with adjusted offsets.
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::host::LocalHost;
//! use isolate_fetch::Blob;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let host = LocalHost::new();
//! host.run(async {
//!     let blob = Blob::new(["hello ", "world"], "Text/Plain")?;
//!     assert_eq!(blob.size(), 11);
//!     assert_eq!(blob.content_type(), "text/plain");
//!
//!     let world = blob.slice(Some(-5), None, None);
//!     assert_eq!(world.text().await?, "world");
//!     assert_eq!(world.content_type(), "");
//!     Ok::<_, Box<dyn std::error::Error>>(())
//! })
//! .await
//! # }
//! ```
mod backing;
mod content_type;

use content_type::normalize as normalize_type;

use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures_lite::{ready, Stream};

use self::backing::BackingRef;
use crate::host::{self, AnyHost, BoundaryError};
use crate::stream::ByteStream;
use crate::BodyError;

/// A piece of content handed to [`Blob::new`].
#[derive(Debug, Clone)]
pub enum BlobPart {
    /// Text, stored as UTF-8.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// Another blob, whose parts are referenced rather than copied.
    Blob(Blob),
}

impl From<&str> for BlobPart {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for BlobPart {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for BlobPart {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for BlobPart {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<&[u8]> for BlobPart {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Blob> for BlobPart {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}

impl From<&Blob> for BlobPart {
    fn from(blob: &Blob) -> Self {
        Self::Blob(blob.clone())
    }
}

/// An immutable sequence of bytes with a content type.
///
/// Cloning is cheap and shares the underlying storage.
#[derive(Clone, Default)]
pub struct Blob {
    parts: Vec<BackingRef>,
    size: u64,
    content_type: String,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("size", &self.size)
            .field("type", &self.content_type)
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl Blob {
    /// An empty blob with the empty type. Needs no host.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a blob from `parts` using the [current](host::current) host.
    ///
    /// Adjacent text and byte parts are joined into one host buffer; nested
    /// blobs are flattened into their references. `content_type` is
    /// normalized, never rejected. The host is only consulted when there is
    /// literal content to store.
    pub fn new<I, P>(parts: I, content_type: &str) -> Result<Self, BoundaryError>
    where
        I: IntoIterator<Item = P>,
        P: Into<BlobPart>,
    {
        let mut cached: Option<AnyHost> = None;
        Self::build(parts, content_type, || {
            if let Some(cached) = &cached {
                return Ok(cached.clone());
            }
            let current = host::current()?;
            cached = Some(current.clone());
            Ok(current)
        })
    }

    /// Like [`Blob::new`], storing literal content in `host`.
    pub fn with_host<I, P>(host: &AnyHost, parts: I, content_type: &str) -> Result<Self, BoundaryError>
    where
        I: IntoIterator<Item = P>,
        P: Into<BlobPart>,
    {
        Self::build(parts, content_type, || Ok(host.clone()))
    }

    fn build<I, P>(
        parts: I,
        content_type: &str,
        mut host: impl FnMut() -> Result<AnyHost, BoundaryError>,
    ) -> Result<Self, BoundaryError>
    where
        I: IntoIterator<Item = P>,
        P: Into<BlobPart>,
    {
        let mut refs = Vec::new();
        let mut pending = BytesMut::new();
        let mut flush = |pending: &mut BytesMut,
                         refs: &mut Vec<BackingRef>|
         -> Result<(), BoundaryError> {
            if pending.is_empty() {
                return Ok(());
            }
            let bytes = pending.split().freeze();
            refs.push(BackingRef::buffer(host()?, bytes)?);
            Ok(())
        };
        for part in parts {
            match part.into() {
                BlobPart::Text(text) => pending.extend_from_slice(text.as_bytes()),
                BlobPart::Bytes(bytes) => pending.extend_from_slice(&bytes),
                BlobPart::Blob(blob) => {
                    flush(&mut pending, &mut refs)?;
                    refs.extend(blob.parts);
                }
            }
        }
        flush(&mut pending, &mut refs)?;
        Ok(Self::from_refs(refs, normalize_type(content_type)))
    }

    /// A blob backed by `stream`, which must produce exactly `size` bytes.
    ///
    /// The stream is pulled on first read and retained, so the blob stays
    /// re-readable. A stream that ends early fails the read with
    /// [`BodyError::Truncated`].
    pub fn from_stream(stream: ByteStream, size: u64, content_type: &str) -> Self {
        let parts = if size == 0 {
            Vec::new()
        } else {
            vec![BackingRef::stream(stream, size)]
        };
        Self::from_refs(parts, normalize_type(content_type))
    }

    fn from_refs(parts: Vec<BackingRef>, content_type: String) -> Self {
        let size = parts.iter().map(BackingRef::size).sum();
        Self {
            parts,
            size,
            content_type,
        }
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns `true` for a zero-length blob.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The normalized content type, possibly empty.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub(crate) fn with_type(mut self, content_type: &str) -> Self {
        self.content_type = normalize_type(content_type);
        self
    }

    /// Returns the bytes in `[start, end)` as a new blob.
    ///
    /// Negative bounds count from the end; all bounds are clamped to
    /// `0..=size`, and an inverted range gives an empty blob. The result has
    /// the normalized `content_type`, or the empty type when none is given.
    ///
    /// ```rust
    /// use isolate_fetch::host::{AnyHost, LocalHost};
    /// use isolate_fetch::Blob;
    ///
    /// let host = AnyHost::new(LocalHost::new());
    /// let blob = Blob::with_host(&host, ["abcdef"], "").unwrap();
    /// assert_eq!(blob.slice(Some(1), Some(-1), None).size(), 4);
    /// assert_eq!(blob.slice(Some(4), Some(2), None).size(), 0);
    /// assert_eq!(blob.slice(None, Some(100), Some("text/plain")).size(), 6);
    /// ```
    pub fn slice(&self, start: Option<i64>, end: Option<i64>, content_type: Option<&str>) -> Blob {
        let start = clamp(start.unwrap_or(0), self.size);
        let end = clamp(end.unwrap_or(self.size as i64), self.size);
        let mut skip = start;
        let mut remaining = end.saturating_sub(start);

        let mut parts = Vec::new();
        for part in &self.parts {
            if remaining == 0 {
                break;
            }
            let size = part.size();
            if skip >= size {
                skip -= size;
                continue;
            }
            let take = (size - skip).min(remaining);
            if skip == 0 && take == size {
                parts.push(part.clone());
            } else {
                parts.push(part.slice(skip, skip + take));
            }
            remaining -= take;
            skip = 0;
        }
        Self::from_refs(parts, content_type.map(normalize_type).unwrap_or_default())
    }

    /// Reads the parts in order as a stream of chunks.
    pub fn stream(&self) -> ByteStream {
        ByteStream {
            inner: Box::pin(BlobStream {
                pending: self.parts.iter().cloned().collect(),
                current: None,
            }),
        }
    }

    /// Reads the whole blob into memory.
    pub async fn bytes(&self) -> Result<Bytes, BodyError> {
        self.stream().collect_bytes().await
    }

    /// Reads the whole blob as text, replacing invalid UTF-8.
    pub async fn text(&self) -> Result<String, BodyError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn clamp(relative: i64, size: u64) -> u64 {
    if relative < 0 {
        size.saturating_sub(relative.unsigned_abs())
    } else {
        (relative as u64).min(size)
    }
}

struct BlobStream {
    pending: VecDeque<BackingRef>,
    current: Option<ByteStream>,
}

impl Stream for BlobStream {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                match ready!(Pin::new(current).poll_next(cx)) {
                    Some(Ok(chunk)) if chunk.is_empty() => continue,
                    Some(item) => return Poll::Ready(Some(item)),
                    None => self.current = None,
                }
            }
            let Some(part) = self.pending.pop_front() else {
                return Poll::Ready(None);
            };
            self.current = Some(part.open());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;

    fn host() -> AnyHost {
        AnyHost::new(LocalHost::new())
    }

    #[tokio::test]
    async fn slice_spans_parts() {
        let host = host();
        let a = Blob::with_host(&host, ["abc"], "").unwrap();
        let b = Blob::with_host(&host, ["def"], "").unwrap();
        let joined = Blob::with_host(&host, [BlobPart::from(&a), "XY".into(), b.into()], "").unwrap();
        assert_eq!(joined.size(), 8);
        assert_eq!(joined.parts.len(), 3);

        let middle = joined.slice(Some(2), Some(7), None);
        assert_eq!(middle.size(), 5);
        assert_eq!(middle.text().await.unwrap(), "cXYde");
        assert_eq!(middle.parts.len(), 3);
    }

    #[tokio::test]
    async fn adjacent_literals_share_a_buffer() {
        let local = LocalHost::new();
        let host = local.to_any();
        let blob = Blob::with_host(&host, ["a", "", "b"], "").unwrap();
        assert_eq!(blob.parts.len(), 1);
        assert_eq!(local.buffer_count(), 1);

        let empty = Blob::with_host(&host, [""], "").unwrap();
        assert!(empty.is_empty());
        assert_eq!(local.buffer_count(), 1);
    }

    #[tokio::test]
    async fn sliced_reads_allocate_no_buffers() {
        let local = LocalHost::new();
        let blob = Blob::with_host(&local.to_any(), ["hello world"], "").unwrap();
        let word = blob.slice(Some(6), None, None);
        for _ in 0..3 {
            assert_eq!(word.text().await.unwrap(), "world");
        }
        assert_eq!(local.buffer_count(), 1);
    }

    #[tokio::test]
    async fn stream_backed_blob_rereads() {
        let blob = Blob::from_stream(ByteStream::from_chunks(["01234", "56789"]), 10, "");
        assert_eq!(blob.slice(Some(3), Some(8), None).text().await.unwrap(), "34567");
        assert_eq!(blob.text().await.unwrap(), "0123456789");
        assert_eq!(blob.size(), 10);
    }

    #[tokio::test]
    async fn short_stream_is_truncated() {
        let blob = Blob::from_stream(ByteStream::from_bytes("abc"), 5, "");
        let err = blob.bytes().await.unwrap_err();
        assert!(matches!(
            err,
            BodyError::Truncated {
                expected: 5,
                received: 3
            }
        ));
    }

    #[test]
    fn slice_type_is_normalized() {
        let blob = Blob::empty();
        assert_eq!(blob.slice(None, None, Some("TEXT/CSV")).content_type(), "text/csv");
        assert_eq!(blob.slice(None, None, Some("\u{1}")).content_type(), "");
        assert_eq!(blob.slice(None, None, None).content_type(), "");
    }

    #[test]
    fn new_without_literals_needs_no_host() {
        let blob = Blob::new(Vec::<BlobPart>::new(), "x/y").unwrap();
        assert_eq!(blob.content_type(), "x/y");
        assert!(Blob::new(["text"], "").is_err());
    }
}
