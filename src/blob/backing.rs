use core::fmt;

use bytes::Bytes;
use futures_lite::stream;

use crate::host::{AnyHost, BoundaryError, BufferHandle};
use crate::stream::shared::SharedStream;
use crate::stream::ByteStream;
use crate::BodyError;

/// Where a range of blob bytes lives.
///
/// Slicing never touches the host: it only narrows the view.
#[derive(Clone, Debug)]
pub(crate) enum BackingRef {
    Buffer(BufferRef),
    Stream(StreamRef),
}

#[derive(Clone)]
pub(crate) struct BufferRef {
    host: AnyHost,
    handle: BufferHandle,
    start: u64,
    size: u64,
    full_len: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct StreamRef {
    source: SharedStream,
    offset: u64,
    size: u64,
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRef")
            .field("handle", &self.handle)
            .field("start", &self.start)
            .field("size", &self.size)
            .finish()
    }
}

impl BackingRef {
    pub(crate) fn buffer(host: AnyHost, bytes: Bytes) -> Result<Self, BoundaryError> {
        let full_len = bytes.len() as u64;
        let handle = host.create_buffer(bytes)?;
        Ok(Self::Buffer(BufferRef {
            host,
            handle,
            start: 0,
            size: full_len,
            full_len,
        }))
    }

    pub(crate) fn stream(source: ByteStream, size: u64) -> Self {
        Self::Stream(StreamRef {
            source: SharedStream::new(source, true),
            offset: 0,
            size,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        match self {
            Self::Buffer(buffer) => buffer.size,
            Self::Stream(stream) => stream.size,
        }
    }

    /// Narrows to `[start, end)` relative to this reference. Caller keeps the
    /// bounds within `0..=size`.
    pub(crate) fn slice(&self, start: u64, end: u64) -> Self {
        debug_assert!(start <= end && end <= self.size());
        match self {
            Self::Buffer(buffer) => Self::Buffer(BufferRef {
                start: buffer.start + start,
                size: end - start,
                ..buffer.clone()
            }),
            Self::Stream(stream) => Self::Stream(StreamRef {
                source: stream.source.clone(),
                offset: stream.offset + start,
                size: end - start,
            }),
        }
    }

    /// Opens a fresh reader over exactly this range.
    pub(crate) fn open(&self) -> ByteStream {
        match self {
            Self::Buffer(buffer) => {
                let buffer = buffer.clone();
                ByteStream {
                    inner: Box::pin(stream::once_future(async move {
                        buffer.read().map_err(BodyError::from)
                    })),
                }
            }
            Self::Stream(stream) => stream.source.reader().window(stream.offset, stream.size),
        }
    }
}

impl BufferRef {
    // Views are cut locally so repeated reads never allocate host buffers.
    fn read(&self) -> Result<Bytes, BoundaryError> {
        let bytes = self.host.read_buffer(self.handle)?;
        if self.start == 0 && self.size == self.full_len {
            return Ok(bytes);
        }
        let start = self.start as usize;
        let end = start + self.size as usize;
        if end > bytes.len() {
            return Err(BoundaryError::new(
                "buffer/read",
                format!("buffer holds {} bytes, view ends at {end}", bytes.len()),
            ));
        }
        Ok(bytes.slice(start..end))
    }
}
