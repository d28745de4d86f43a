//! One upstream, many readers.
//!
//! Every reader keeps its own position into a window of buffered chunks. In
//! tee mode a chunk is released once every live reader has passed it; in
//! replay mode nothing is released and new readers start from the beginning,
//! which is what stream-backed blobs need to stay re-readable.

use core::cell::RefCell;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use futures_lite::Stream;

use super::ByteStream;
use crate::BodyError;

struct Cursor {
    pos: u64,
    live: bool,
    finished: bool,
}

struct State {
    source: Option<ByteStream>,
    chunks: VecDeque<Bytes>,
    // Index of `chunks[0]` in the upstream sequence.
    base: u64,
    cursors: Vec<Cursor>,
    ended: bool,
    error: Option<BodyError>,
    error_seen: bool,
    retain: bool,
    wakers: Vec<Waker>,
}

impl State {
    fn release(&mut self) {
        if self.retain {
            return;
        }
        let min = self
            .cursors
            .iter()
            .filter(|cursor| cursor.live)
            .map(|cursor| cursor.pos)
            .min()
            .unwrap_or(self.base + self.chunks.len() as u64);
        while self.base < min && self.chunks.pop_front().is_some() {
            self.base += 1;
        }
    }

    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

/// Handle to an upstream shared by several readers.
#[derive(Clone)]
pub(crate) struct SharedStream {
    state: Rc<RefCell<State>>,
}

impl core::fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SharedStream")
            .field("buffered", &state.chunks.len())
            .field("ended", &state.ended)
            .field("retain", &state.retain)
            .finish()
    }
}

impl SharedStream {
    /// `retain` keeps every chunk so readers created later still see all of them.
    pub(crate) fn new(source: ByteStream, retain: bool) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                source: Some(source),
                chunks: VecDeque::new(),
                base: 0,
                cursors: Vec::new(),
                ended: false,
                error: None,
                error_seen: false,
                retain,
                wakers: Vec::new(),
            })),
        }
    }

    /// Opens a reader positioned at the oldest chunk still buffered.
    pub(crate) fn reader(&self) -> ByteStream {
        let mut state = self.state.borrow_mut();
        let pos = state.base;
        state.cursors.push(Cursor {
            pos,
            live: true,
            finished: false,
        });
        let slot = state.cursors.len() - 1;
        drop(state);
        ByteStream {
            inner: Box::pin(Reader {
                state: self.state.clone(),
                slot,
            }),
        }
    }
}

struct Reader {
    state: Rc<RefCell<State>>,
    slot: usize,
}

impl Stream for Reader {
    type Item = Result<Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let slot = self.slot;
        let mut state = self.state.borrow_mut();
        loop {
            if state.cursors[slot].finished {
                return Poll::Ready(None);
            }
            let pos = state.cursors[slot].pos;
            let offset = (pos - state.base) as usize;
            if let Some(chunk) = state.chunks.get(offset).cloned() {
                state.cursors[slot].pos += 1;
                state.release();
                return Poll::Ready(Some(Ok(chunk)));
            }
            if state.ended {
                state.cursors[slot].finished = true;
                let Some(error) = state.error.take() else {
                    return Poll::Ready(None);
                };
                // The first reader gets the original, later ones a copy.
                let copy = error.share();
                if state.error_seen {
                    state.error = Some(error);
                    return Poll::Ready(Some(Err(copy)));
                }
                state.error_seen = true;
                state.error = Some(copy);
                return Poll::Ready(Some(Err(error)));
            }

            // Nobody else can be polling the upstream while this borrow is released.
            let Some(mut source) = state.source.take() else {
                state.wakers.push(cx.waker().clone());
                return Poll::Pending;
            };
            drop(state);
            let polled = Pin::new(&mut source).poll_next(cx);
            state = self.state.borrow_mut();
            state.source = Some(source);
            match polled {
                Poll::Ready(Some(Ok(chunk))) => {
                    if !chunk.is_empty() {
                        state.chunks.push_back(chunk);
                    }
                    state.wake_all();
                }
                Poll::Ready(Some(Err(error))) => {
                    state.ended = true;
                    state.error = Some(error);
                    state.source = None;
                    state.wake_all();
                }
                Poll::Ready(None) => {
                    state.ended = true;
                    state.source = None;
                    state.wake_all();
                }
                Poll::Pending => {
                    state.wakers.push(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.cursors[self.slot].live = false;
            state.release();
            // A dropped reader may have been the one registered with the upstream.
            state.wake_all();
        }
    }
}
