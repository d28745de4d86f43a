use futures_lite::stream;
use tracing::trace;

use super::ByteStream;
use crate::host::{AnyHost, ReadPart, StreamId};
use crate::BodyError;

// One `stream/readPart` per pull. Empty chunks are swallowed and the pull
// retried so readers never observe them.
pub(super) fn pull(host: AnyHost, id: StreamId) -> ByteStream {
    let pulls = stream::unfold(Some((host, id)), |state| async move {
        let (host, id) = state?;
        loop {
            match host.read_part(id).await {
                Ok(ReadPart {
                    value: Some(chunk),
                    done,
                }) if !chunk.is_empty() => {
                    let next = (!done).then_some((host, id));
                    return Some((Ok(chunk), next));
                }
                Ok(ReadPart { done: true, .. }) => {
                    trace!(stream = %id, "inbound stream finished");
                    return None;
                }
                Ok(_) => continue,
                Err(err) => return Some((Err(BodyError::from(err)), None)),
            }
        }
    });
    ByteStream {
        inner: Box::pin(pulls),
    }
}
