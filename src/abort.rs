//! Advisory cancellation.
//!
//! An [`AbortController`] owns the right to fire; its [`AbortSignal`] is handed
//! to requests. Firing is one-way: a signal never un-fires.
//!
//! Towards the host a signal is surfaced as a stream that never yields and
//! closes once the signal fires, which lets the host tear down an in-flight
//! exchange. The redirect pipeline additionally checks the signal before
//! every hop.
//!
//! ```rust
//! use isolate_fetch::AbortController;
//!
//! let controller = AbortController::new();
//! let signal = controller.signal();
//! assert!(!signal.aborted());
//! controller.abort();
//! assert!(signal.aborted());
//! ```
use core::cell::RefCell;
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use std::rc::Rc;

use futures_lite::Stream;
use tracing::trace;

use crate::host::{AnyHost, BoundaryError, StreamId};
use crate::stream::{outbound, ByteStream};
use crate::BodyError;

impl_error!(Aborted, Aborted, "the operation was aborted");

#[derive(Default)]
struct SignalState {
    fired: bool,
    listeners: Vec<Box<dyn FnOnce()>>,
    wakers: Vec<Waker>,
}

/// The observing half of an [`AbortController`].
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Rc<RefCell<SignalState>>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.aborted())
            .finish()
    }
}

impl AbortSignal {
    /// A signal that has already fired.
    pub fn aborted_signal() -> Self {
        let signal = Self::default();
        signal.fire();
        signal
    }

    /// Whether the signal has fired.
    pub fn aborted(&self) -> bool {
        self.state.borrow().fired
    }

    /// Runs `listener` once when the signal fires, or right away if it
    /// already has.
    pub fn on_abort(&self, listener: impl FnOnce() + 'static) {
        let mut state = self.state.borrow_mut();
        if state.fired {
            drop(state);
            listener();
            return;
        }
        state.listeners.push(Box::new(listener));
    }

    /// A stream that never yields a chunk and ends when the signal fires.
    pub fn closed_stream(&self) -> ByteStream {
        ByteStream {
            inner: Box::pin(SignalStream {
                signal: self.clone(),
            }),
        }
    }

    fn fire(&self) {
        let (listeners, wakers) = {
            let mut state = self.state.borrow_mut();
            if state.fired {
                return;
            }
            state.fired = true;
            (
                core::mem::take(&mut state.listeners),
                core::mem::take(&mut state.wakers),
            )
        };
        trace!(listeners = listeners.len(), "abort signal fired");
        for listener in listeners {
            listener();
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Fires an [`AbortSignal`].
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Creates a controller with a fresh signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal fired by this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fires the signal. Later calls do nothing.
    pub fn abort(&self) {
        self.signal.fire();
    }
}

struct SignalStream {
    signal: AbortSignal,
}

impl Stream for SignalStream {
    type Item = Result<bytes::Bytes, BodyError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.signal.state.borrow_mut();
        if state.fired {
            return Poll::Ready(None);
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Allocates the host stream a request carries as its cancellation channel.
///
/// Without a signal the stream is created and left open. A signal that has
/// already fired yields a stream that is closed on creation.
pub(crate) fn bridge(host: &AnyHost, signal: Option<&AbortSignal>) -> Result<StreamId, BoundaryError> {
    match signal {
        None => host.create_stream(),
        Some(signal) if signal.aborted() => outbound::pump(host, None).map(|pump| pump.id()),
        Some(signal) => outbound::pump(host, Some(signal.closed_stream())).map(|pump| pump.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;
    use core::cell::Cell;

    #[test]
    fn listeners_run_once() {
        let controller = AbortController::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        controller.signal().on_abort(move || counter.set(counter.get() + 1));
        controller.abort();
        controller.abort();
        assert_eq!(hits.get(), 1);

        let late = hits.clone();
        controller.signal().on_abort(move || late.set(late.get() + 10));
        assert_eq!(hits.get(), 11);
    }

    #[tokio::test]
    async fn bridge_closes_on_abort() {
        let local = LocalHost::new();
        let host = local.to_any();
        let controller = AbortController::new();
        let id = bridge(&host, Some(&controller.signal())).unwrap();

        local
            .run(async {
                // Let the pump task register with the signal.
                futures_lite::future::yield_now().await;
                assert!(!local.is_stream_closed(id));
                controller.abort();
                local.read_stream(id).await.unwrap()
            })
            .await;
        assert!(local.is_stream_closed(id));
    }

    #[tokio::test]
    async fn idle_bridge_keeps_one_waker() {
        let local = LocalHost::new();
        let controller = AbortController::new();
        let signal = controller.signal();
        bridge(&local.to_any(), Some(&signal)).unwrap();

        local
            .run(async {
                for _ in 0..100 {
                    futures_lite::future::yield_now().await;
                }
            })
            .await;
        assert_eq!(signal.state.borrow().wakers.len(), 1);

        controller.abort();
        assert!(signal.state.borrow().wakers.is_empty());
    }

    #[tokio::test]
    async fn bridge_without_signal_only_creates() {
        let local = LocalHost::new();
        let id = bridge(&local.to_any(), None).unwrap();
        assert!(!local.is_stream_closed(id));
        assert_eq!(local.pending_tasks(), 0);

        let id = bridge(&local.to_any(), Some(&AbortSignal::aborted_signal())).unwrap();
        assert!(local.is_stream_closed(id));
        assert_eq!(local.pending_tasks(), 0);
    }
}
