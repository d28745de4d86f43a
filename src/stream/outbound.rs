use core::cell::RefCell;
use std::rc::Rc;

use futures_lite::StreamExt;
use tracing::{trace, warn};

use super::ByteStream;
use crate::host::{AnyHost, BoundaryError, StreamId};
use crate::BodyError;

/// A host stream being fed by [`pump`].
///
/// `stream/extend` cannot carry an error, so a source that fails still ends
/// the host stream. The failure is kept here and whoever handed the id to
/// the host must check [`Pump::take_error`] once the host is done with it.
#[derive(Debug, Clone)]
pub(crate) struct Pump {
    id: StreamId,
    failure: Rc<RefCell<Option<BodyError>>>,
}

impl Pump {
    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    /// The error the source stream ended with, if it has failed.
    pub(crate) fn take_error(&self) -> Option<BodyError> {
        self.failure.borrow_mut().take()
    }
}

/// Hands `stream` to the host as a fresh host stream.
///
/// The id is allocated before anything is read. Chunks are then pushed with
/// `stream/extend` by a task on the host run loop, independent of whoever
/// consumes the id. `None` produces a stream that is already finished.
pub(crate) fn pump(host: &AnyHost, stream: Option<ByteStream>) -> Result<Pump, BoundaryError> {
    let id = host.create_stream()?;
    let pump = Pump {
        id,
        failure: Rc::default(),
    };
    let Some(mut stream) = stream else {
        host.extend_stream(id, None, true)?;
        return Ok(pump);
    };

    let task_host = host.clone();
    let failure = pump.failure.clone();
    host.spawn(Box::pin(async move {
        trace!(stream = %id, "outbound pump started");
        let mut sent = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(stream = %id, error = %err, "outbound body failed, closing stream");
                    *failure.borrow_mut() = Some(err);
                    break;
                }
            };
            sent += chunk.len() as u64;
            if let Err(err) = task_host.extend_stream(id, Some(chunk), false) {
                warn!(stream = %id, error = %err, "host rejected outbound chunk");
                return;
            }
        }
        if let Err(err) = task_host.extend_stream(id, None, true) {
            warn!(stream = %id, error = %err, "host rejected end of outbound stream");
            return;
        }
        trace!(stream = %id, bytes = sent, "outbound pump finished");
    }));
    Ok(pump)
}
