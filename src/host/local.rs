//! An in-process [`Host`] for embedding and tests.
//!
//! Buffers and streams live in hash maps, randomness comes from a seeded
//! `fastrand` generator, and `dispatch` is answered by a user supplied async
//! handler. Tasks spawned by the isolate are driven by [`LocalHost::run`].

use core::cell::{Cell, RefCell};
use core::future::{poll_fn, Future};
use core::pin::{pin, Pin};
use core::task::{Poll, Waker};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use super::{
    multipart, AnyHost, BoundaryError, BufferHandle, Host, LocalTask, MultipartEntry, ReadPart,
    RequestDescriptor, ResponseDescriptor, StreamId,
};

type Handler = Rc<
    dyn Fn(
        LocalHost,
        RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<ResponseDescriptor, BoundaryError>>>>,
>;

#[derive(Default)]
struct LocalStream {
    chunks: VecDeque<Bytes>,
    done: bool,
    waker: Option<Waker>,
}

struct Inner {
    buffers: RefCell<HashMap<u64, Bytes>>,
    next_buffer: Cell<u64>,
    streams: RefCell<HashMap<StreamId, LocalStream>>,
    next_stream: Cell<u64>,
    tasks: RefCell<Vec<LocalTask>>,
    rng: RefCell<fastrand::Rng>,
    handler: RefCell<Option<Handler>>,
}

/// An in-memory host.
///
/// Cloning yields another handle to the same host.
#[derive(Clone)]
pub struct LocalHost {
    inner: Rc<Inner>,
}

impl core::fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LocalHost")
            .field("buffers", &self.inner.buffers.borrow().len())
            .field("streams", &self.inner.streams.borrow().len())
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    /// Creates a host with a fixed seed and no dispatch handler.
    pub fn new() -> Self {
        Self::with_seed(0x5EED)
    }

    /// Creates a host whose random stream starts from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Rc::new(Inner {
                buffers: RefCell::default(),
                next_buffer: Cell::new(1),
                streams: RefCell::default(),
                next_stream: Cell::new(1),
                tasks: RefCell::default(),
                rng: RefCell::new(fastrand::Rng::with_seed(seed)),
                handler: RefCell::default(),
            }),
        }
    }

    /// Installs the handler answering [`Host::dispatch`].
    ///
    /// The handler receives a handle to this host so it can read the request
    /// body and build response bodies.
    pub fn with_handler<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(LocalHost, RequestDescriptor) -> Fut + 'static,
        Fut: Future<Output = Result<ResponseDescriptor, BoundaryError>> + 'static,
    {
        let handler: Handler = Rc::new(move |host, request| Box::pin(handler(host, request)));
        *self.inner.handler.borrow_mut() = Some(handler);
        self
    }

    /// Wraps this host into an [`AnyHost`] sharing the same state.
    pub fn to_any(&self) -> AnyHost {
        AnyHost::new(self.clone())
    }

    /// Creates a finished stream holding `bytes`.
    pub fn stream_from_bytes(&self, bytes: impl Into<Bytes>) -> Result<StreamId, BoundaryError> {
        let id = Host::create_stream(self)?;
        let bytes = bytes.into();
        let chunk = (!bytes.is_empty()).then_some(bytes);
        Host::extend_stream(self, id, chunk, true)?;
        Ok(id)
    }

    /// Creates a finished stream holding `chunks` as separate chunks.
    pub fn stream_from_chunks<I, B>(&self, chunks: I) -> Result<StreamId, BoundaryError>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let id = Host::create_stream(self)?;
        for chunk in chunks {
            Host::extend_stream(self, id, Some(chunk.into()), false)?;
        }
        Host::extend_stream(self, id, None, true)?;
        Ok(id)
    }

    /// Drains a stream to its end.
    pub async fn read_stream(&self, id: StreamId) -> Result<Bytes, BoundaryError> {
        let mut out = BytesMut::new();
        loop {
            let part = Host::read_part(self, id).await?;
            if let Some(value) = part.value {
                out.extend_from_slice(&value);
            }
            if part.done {
                return Ok(out.freeze());
            }
        }
    }

    /// Returns whether the host has seen `done` for the stream.
    pub fn is_stream_closed(&self, id: StreamId) -> bool {
        self.inner
            .streams
            .borrow()
            .get(&id)
            .is_some_and(|stream| stream.done)
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of live host buffers.
    pub fn buffer_count(&self) -> usize {
        self.inner.buffers.borrow().len()
    }

    /// Runs `future` to completion with this host current, driving spawned
    /// tasks in between polls.
    ///
    /// Tasks still pending when `future` completes stay queued.
    pub async fn run<F: Future>(&self, future: F) -> F::Output {
        let _guard = self.to_any().enter();
        let mut future = pin!(future);
        poll_fn(|cx| {
            self.poll_tasks(cx);
            if let Poll::Ready(output) = future.as_mut().poll(cx) {
                return Poll::Ready(output);
            }
            self.poll_tasks(cx);
            Poll::Pending
        })
        .await
    }

    fn poll_tasks(&self, cx: &mut core::task::Context<'_>) {
        // Tasks may spawn more tasks, so the queue is never borrowed while polling.
        let tasks = core::mem::take(&mut *self.inner.tasks.borrow_mut());
        let mut pending = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            if task.as_mut().poll(cx).is_pending() {
                pending.push(task);
            }
        }
        let mut queue = self.inner.tasks.borrow_mut();
        if !queue.is_empty() {
            // Freshly spawned tasks get a poll of their own on the next wake.
            cx.waker().wake_by_ref();
        }
        pending.append(&mut queue);
        *queue = pending;
    }
}

impl Host for LocalHost {
    fn create_buffer(&self, bytes: Bytes) -> Result<BufferHandle, BoundaryError> {
        let id = self.inner.next_buffer.get();
        self.inner.next_buffer.set(id + 1);
        self.inner.buffers.borrow_mut().insert(id, bytes);
        Ok(BufferHandle::from_raw(id))
    }

    fn slice_buffer(
        &self,
        handle: BufferHandle,
        start: u64,
        len: u64,
    ) -> Result<BufferHandle, BoundaryError> {
        let bytes = Host::read_buffer(self, handle)?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= bytes.len() as u64)
            .ok_or_else(|| {
                BoundaryError::new(
                    "buffer/slice",
                    format!("range {start}+{len} exceeds buffer of {} bytes", bytes.len()),
                )
            })?;
        Host::create_buffer(self, bytes.slice(start as usize..end as usize))
    }

    fn read_buffer(&self, handle: BufferHandle) -> Result<Bytes, BoundaryError> {
        self.inner
            .buffers
            .borrow()
            .get(&handle.into_raw())
            .cloned()
            .ok_or_else(|| BoundaryError::new("buffer/read", "unknown buffer handle"))
    }

    fn create_stream(&self) -> Result<StreamId, BoundaryError> {
        let n = self.inner.next_stream.get();
        self.inner.next_stream.set(n + 1);
        let id = StreamId::from_uuid(Uuid::from_u64_pair(0, n));
        self.inner
            .streams
            .borrow_mut()
            .insert(id, LocalStream::default());
        Ok(id)
    }

    fn extend_stream(
        &self,
        id: StreamId,
        chunk: Option<Bytes>,
        done: bool,
    ) -> Result<(), BoundaryError> {
        let mut streams = self.inner.streams.borrow_mut();
        let stream = streams
            .get_mut(&id)
            .ok_or_else(|| BoundaryError::new("stream/extend", format!("unknown stream {id}")))?;
        if stream.done {
            return Err(BoundaryError::new(
                "stream/extend",
                format!("stream {id} already finished"),
            ));
        }
        if let Some(chunk) = chunk {
            stream.chunks.push_back(chunk);
        }
        stream.done = done;
        if let Some(waker) = stream.waker.take() {
            waker.wake();
        }
        Ok(())
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<(), BoundaryError> {
        self.inner.rng.borrow_mut().fill(buf);
        Ok(())
    }

    fn search_param_pairs(&self, query: &str) -> Result<Vec<(String, String)>, BoundaryError> {
        Ok(url::form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect())
    }

    fn spawn(&self, task: LocalTask) {
        self.inner.tasks.borrow_mut().push(task);
    }

    async fn read_part(&self, id: StreamId) -> Result<ReadPart, BoundaryError> {
        poll_fn(|cx| {
            let mut streams = self.inner.streams.borrow_mut();
            let Some(stream) = streams.get_mut(&id) else {
                return Poll::Ready(Err(BoundaryError::new(
                    "stream/readPart",
                    format!("unknown stream {id}"),
                )));
            };
            if let Some(chunk) = stream.chunks.pop_front() {
                Poll::Ready(Ok(ReadPart {
                    value: Some(chunk),
                    done: false,
                }))
            } else if stream.done {
                Poll::Ready(Ok(ReadPart {
                    value: None,
                    done: true,
                }))
            } else {
                stream.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .await
    }

    async fn parse_multipart(
        &self,
        content_type: &str,
        id: StreamId,
    ) -> Result<Vec<MultipartEntry>, BoundaryError> {
        let body = self.read_stream(id).await?;
        let mime: mime::Mime = content_type
            .parse()
            .map_err(|err| BoundaryError::new("multipart/parse", err))?;
        let boundary = mime
            .get_param(mime::BOUNDARY)
            .ok_or_else(|| BoundaryError::new("multipart/parse", "missing boundary"))?;
        multipart::parse(&body, boundary.as_str())
            .map_err(|reason| BoundaryError::new("multipart/parse", reason))
    }

    async fn dispatch(
        &self,
        request: RequestDescriptor,
    ) -> Result<ResponseDescriptor, BoundaryError> {
        let handler = self
            .inner
            .handler
            .borrow()
            .clone()
            .ok_or_else(|| BoundaryError::new("dispatch", "no dispatch handler installed"))?;
        handler(self.clone(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffers_slice_and_read() {
        let host = LocalHost::new();
        let handle = Host::create_buffer(&host, Bytes::from_static(b"hello world")).unwrap();
        let slice = Host::slice_buffer(&host, handle, 6, 5).unwrap();
        assert_eq!(Host::read_buffer(&host, slice).unwrap(), "world");
        assert!(Host::slice_buffer(&host, handle, 6, 6).is_err());
    }

    #[tokio::test]
    async fn stream_chunks_arrive_in_order() {
        let host = LocalHost::new();
        let id = host.stream_from_chunks(["ab", "cd"]).unwrap();
        assert_eq!(host.read_stream(id).await.unwrap(), "abcd");
        assert!(host.is_stream_closed(id));
        assert!(Host::extend_stream(&host, id, None, true).is_err());
    }

    #[tokio::test]
    async fn run_drives_spawned_tasks() {
        let host = LocalHost::new();
        let id = Host::create_stream(&host).unwrap();
        let writer = host.clone();
        Host::spawn(
            &host,
            Box::pin(async move {
                Host::extend_stream(&writer, id, Some(Bytes::from_static(b"late")), true).unwrap();
            }),
        );
        let body = host.run(host.read_stream(id)).await.unwrap();
        assert_eq!(body, "late");
        assert_eq!(host.pending_tasks(), 0);
    }

    #[test]
    fn random_is_deterministic_per_seed() {
        let mut a = [0u8; 12];
        let mut b = [0u8; 12];
        Host::fill_random(&LocalHost::with_seed(1), &mut a).unwrap();
        Host::fill_random(&LocalHost::with_seed(1), &mut b).unwrap();
        assert_eq!(a, b);
        Host::fill_random(&LocalHost::with_seed(2), &mut b).unwrap();
        assert_ne!(a, b);
    }
}
