//! The operation boundary between the isolate and its host.
//!
//! Every piece of real I/O this crate performs goes through a [`Host`]: byte
//! buffers live in host memory behind [`BufferHandle`]s, streams are identified
//! by [`StreamId`]s and pumped chunk by chunk, randomness and multipart parsing
//! are delegated, and outbound requests are handed over as a
//! [`RequestDescriptor`].
//!
//! Handles are opaque. They are only ever passed back to the host that issued
//! them, which is why buffer references keep the [`AnyHost`] they came from.
//!
//! The crate looks up the host of the running invocation through
//! [`current`]. The embedder makes a host current with [`AnyHost::enter`]:
//!
//! ```rust
//! use isolate_fetch::host::{self, AnyHost, LocalHost};
//!
//! let host = AnyHost::new(LocalHost::new());
//! let _guard = host.enter();
//! assert!(host::current().is_ok());
//! ```
mod local;
mod multipart;

pub use local::LocalHost;

use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use std::rc::Rc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, FetchError};

/// A task scheduled on the host's run loop.
pub type LocalTask = Pin<Box<dyn Future<Output = ()>>>;

type BoxFuture<'fut, T> = Pin<Box<dyn Future<Output = T> + 'fut>>;

/// Opaque handle to a host-resident byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    /// Wraps a raw handle issued by a host.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value, for host implementations.
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

/// Opaque identifier of a host-side stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Wraps a raw identifier issued by a host.
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying identifier.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of one `stream/readPart` call.
#[derive(Debug, Clone, Default)]
pub struct ReadPart {
    /// The chunk, if any. May be empty.
    pub value: Option<Bytes>,
    /// Whether the stream has finished.
    pub done: bool,
}

/// One field returned by the host's multipart parser.
#[derive(Debug, Clone)]
pub struct MultipartEntry {
    /// The field name from `Content-Disposition`.
    pub name: String,
    /// The filename, present for file fields.
    pub filename: Option<String>,
    /// The part's `Content-Type`, if it had one.
    pub content_type: Option<String>,
    /// The raw part content.
    pub data: Bytes,
}

/// Outbound request as handed to [`Host::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// Absolute request URL.
    pub url: String,
    /// Header name/value pairs in order, names lowercase.
    pub header_pairs: Vec<(String, String)>,
    /// Method token, e.g. `POST`.
    pub method: String,
    /// Stream carrying the request body; `None` for a null body.
    pub body_stream_id: Option<StreamId>,
    /// Stream that closes when the request is cancelled.
    pub cancellation_stream_id: StreamId,
}

/// Inbound response as returned by [`Host::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDescriptor {
    /// Header name/value pairs in order.
    pub header_pairs: Vec<(String, String)>,
    /// Status code.
    pub status: u16,
    /// Stream carrying the response body; `None` for a null body.
    pub body_stream_id: Option<StreamId>,
    /// Final URL when the host followed redirects on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A failure reported by the host. Always fatal, never retried.
#[derive(Debug)]
pub struct BoundaryError {
    op: &'static str,
    message: String,
}

impl BoundaryError {
    /// Creates an error for the named operation, e.g. `"stream/readPart"`.
    pub fn new(op: &'static str, message: impl fmt::Display) -> Self {
        Self {
            op,
            message: message.to_string(),
        }
    }

    /// The operation that failed.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// The host's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BoundaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.op, self.message)
    }
}

impl core::error::Error for BoundaryError {}

impl FetchError for BoundaryError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Boundary
    }
}

/// The operations an embedder provides to the isolate.
///
/// Synchronous operations return immediately; asynchronous ones suspend the
/// caller until the host's run loop resolves them. Implementations are
/// single-threaded: nothing here is `Send`.
#[allow(async_fn_in_trait)]
pub trait Host: 'static {
    /// `buffer/create`: copies `bytes` into host memory.
    fn create_buffer(&self, bytes: Bytes) -> Result<BufferHandle, BoundaryError>;

    /// `buffer/slice`: a new buffer viewing `len` bytes of `handle` starting at `start`.
    fn slice_buffer(
        &self,
        handle: BufferHandle,
        start: u64,
        len: u64,
    ) -> Result<BufferHandle, BoundaryError>;

    /// `buffer/read`: the full content of a buffer.
    fn read_buffer(&self, handle: BufferHandle) -> Result<Bytes, BoundaryError>;

    /// `stream/create`: allocates an empty host stream.
    fn create_stream(&self) -> Result<StreamId, BoundaryError>;

    /// `stream/extend`: appends a chunk and/or marks the stream finished.
    fn extend_stream(
        &self,
        id: StreamId,
        chunk: Option<Bytes>,
        done: bool,
    ) -> Result<(), BoundaryError>;

    /// `random/fill`: fills `buf` from the host's (deterministic) generator.
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), BoundaryError>;

    /// `url/searchParamPairs`: parses an `application/x-www-form-urlencoded` string.
    fn search_param_pairs(&self, query: &str) -> Result<Vec<(String, String)>, BoundaryError>;

    /// Schedules `task` on the host run loop.
    fn spawn(&self, task: LocalTask);

    /// `stream/readPart`: pulls the next chunk of a host stream.
    async fn read_part(&self, id: StreamId) -> Result<ReadPart, BoundaryError>;

    /// `multipart/parse`: drains the stream and parses it as `content_type`.
    async fn parse_multipart(
        &self,
        content_type: &str,
        id: StreamId,
    ) -> Result<Vec<MultipartEntry>, BoundaryError>;

    /// `dispatch`: performs one network exchange.
    async fn dispatch(
        &self,
        request: RequestDescriptor,
    ) -> Result<ResponseDescriptor, BoundaryError>;
}

pub(crate) trait HostImpl {
    fn create_buffer(&self, bytes: Bytes) -> Result<BufferHandle, BoundaryError>;
    fn slice_buffer(
        &self,
        handle: BufferHandle,
        start: u64,
        len: u64,
    ) -> Result<BufferHandle, BoundaryError>;
    fn read_buffer(&self, handle: BufferHandle) -> Result<Bytes, BoundaryError>;
    fn create_stream(&self) -> Result<StreamId, BoundaryError>;
    fn extend_stream(
        &self,
        id: StreamId,
        chunk: Option<Bytes>,
        done: bool,
    ) -> Result<(), BoundaryError>;
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), BoundaryError>;
    fn search_param_pairs(&self, query: &str) -> Result<Vec<(String, String)>, BoundaryError>;
    fn spawn(&self, task: LocalTask);
    fn read_part_inner<'this, 'fut>(
        &'this self,
        id: StreamId,
    ) -> BoxFuture<'fut, Result<ReadPart, BoundaryError>>
    where
        'this: 'fut;
    fn parse_multipart_inner<'this, 'ct, 'fut>(
        &'this self,
        content_type: &'ct str,
        id: StreamId,
    ) -> BoxFuture<'fut, Result<Vec<MultipartEntry>, BoundaryError>>
    where
        'this: 'fut,
        'ct: 'fut;
    fn dispatch_inner<'this, 'fut>(
        &'this self,
        request: RequestDescriptor,
    ) -> BoxFuture<'fut, Result<ResponseDescriptor, BoundaryError>>
    where
        'this: 'fut;
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

impl<H: Host> HostImpl for H {
    fn create_buffer(&self, bytes: Bytes) -> Result<BufferHandle, BoundaryError> {
        Host::create_buffer(self, bytes)
    }

    fn slice_buffer(
        &self,
        handle: BufferHandle,
        start: u64,
        len: u64,
    ) -> Result<BufferHandle, BoundaryError> {
        Host::slice_buffer(self, handle, start, len)
    }

    fn read_buffer(&self, handle: BufferHandle) -> Result<Bytes, BoundaryError> {
        Host::read_buffer(self, handle)
    }

    fn create_stream(&self) -> Result<StreamId, BoundaryError> {
        Host::create_stream(self)
    }

    fn extend_stream(
        &self,
        id: StreamId,
        chunk: Option<Bytes>,
        done: bool,
    ) -> Result<(), BoundaryError> {
        Host::extend_stream(self, id, chunk, done)
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<(), BoundaryError> {
        Host::fill_random(self, buf)
    }

    fn search_param_pairs(&self, query: &str) -> Result<Vec<(String, String)>, BoundaryError> {
        Host::search_param_pairs(self, query)
    }

    fn spawn(&self, task: LocalTask) {
        Host::spawn(self, task)
    }

    fn read_part_inner<'this, 'fut>(
        &'this self,
        id: StreamId,
    ) -> BoxFuture<'fut, Result<ReadPart, BoundaryError>>
    where
        'this: 'fut,
    {
        Box::pin(Host::read_part(self, id))
    }

    fn parse_multipart_inner<'this, 'ct, 'fut>(
        &'this self,
        content_type: &'ct str,
        id: StreamId,
    ) -> BoxFuture<'fut, Result<Vec<MultipartEntry>, BoundaryError>>
    where
        'this: 'fut,
        'ct: 'fut,
    {
        Box::pin(Host::parse_multipart(self, content_type, id))
    }

    fn dispatch_inner<'this, 'fut>(
        &'this self,
        request: RequestDescriptor,
    ) -> BoxFuture<'fut, Result<ResponseDescriptor, BoundaryError>>
    where
        'this: 'fut,
    {
        Box::pin(Host::dispatch(self, request))
    }
}

/// Type-erased, cheaply cloneable handle to a [`Host`].
#[derive(Clone)]
pub struct AnyHost(Rc<dyn HostImpl>);

impl fmt::Debug for AnyHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("AnyHost[{}]", self.0.name()))
    }
}

impl AnyHost {
    /// Wraps a host implementation.
    pub fn new(host: impl Host) -> Self {
        Self(Rc::new(host))
    }

    /// Returns the type name of the underlying host.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Returns `true` if both handles point at the same host instance.
    pub fn same_host(&self, other: &AnyHost) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Makes this host the [`current`] one until the guard is dropped.
    ///
    /// Guards nest: dropping one restores whatever host was current before.
    pub fn enter(&self) -> EnterGuard {
        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        EnterGuard { previous }
    }

    /// See [`Host::create_buffer`].
    pub fn create_buffer(&self, bytes: Bytes) -> Result<BufferHandle, BoundaryError> {
        self.0.create_buffer(bytes)
    }

    /// See [`Host::slice_buffer`].
    pub fn slice_buffer(
        &self,
        handle: BufferHandle,
        start: u64,
        len: u64,
    ) -> Result<BufferHandle, BoundaryError> {
        self.0.slice_buffer(handle, start, len)
    }

    /// See [`Host::read_buffer`].
    pub fn read_buffer(&self, handle: BufferHandle) -> Result<Bytes, BoundaryError> {
        self.0.read_buffer(handle)
    }

    /// See [`Host::create_stream`].
    pub fn create_stream(&self) -> Result<StreamId, BoundaryError> {
        self.0.create_stream()
    }

    /// See [`Host::extend_stream`].
    pub fn extend_stream(
        &self,
        id: StreamId,
        chunk: Option<Bytes>,
        done: bool,
    ) -> Result<(), BoundaryError> {
        self.0.extend_stream(id, chunk, done)
    }

    /// See [`Host::fill_random`].
    pub fn fill_random(&self, buf: &mut [u8]) -> Result<(), BoundaryError> {
        self.0.fill_random(buf)
    }

    /// See [`Host::search_param_pairs`].
    pub fn search_param_pairs(
        &self,
        query: &str,
    ) -> Result<Vec<(String, String)>, BoundaryError> {
        self.0.search_param_pairs(query)
    }

    /// See [`Host::spawn`].
    pub fn spawn(&self, task: LocalTask) {
        self.0.spawn(task)
    }

    /// See [`Host::read_part`].
    pub async fn read_part(&self, id: StreamId) -> Result<ReadPart, BoundaryError> {
        self.0.read_part_inner(id).await
    }

    /// See [`Host::parse_multipart`].
    pub async fn parse_multipart(
        &self,
        content_type: &str,
        id: StreamId,
    ) -> Result<Vec<MultipartEntry>, BoundaryError> {
        self.0.parse_multipart_inner(content_type, id).await
    }

    /// See [`Host::dispatch`].
    pub async fn dispatch(
        &self,
        request: RequestDescriptor,
    ) -> Result<ResponseDescriptor, BoundaryError> {
        self.0.dispatch_inner(request).await
    }
}

std::thread_local! {
    static CURRENT: RefCell<Option<AnyHost>> = const { RefCell::new(None) };
}

/// Restores the previously current host when dropped.
#[derive(Debug)]
#[must_use = "the host stops being current as soon as the guard is dropped"]
pub struct EnterGuard {
    previous: Option<AnyHost>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Returns the host of the running invocation.
pub fn current() -> Result<AnyHost, BoundaryError> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or_else(|| BoundaryError::new("host/current", "no host entered on this thread"))
}
