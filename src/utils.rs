//! Re-exports of the types that appear in this crate's public API.
//!
//! ```rust
//! use isolate_fetch::utils::{stream::StreamExt, Bytes};
//! use isolate_fetch::ByteStream;
//!
//! # futures_lite::future::block_on(async {
//! let mut chunks = ByteStream::from_chunks(["a", "b"]);
//! assert_eq!(chunks.next().await.unwrap().unwrap(), Bytes::from("a"));
//! # });
//! ```

/// Reference-counted byte buffer used for every chunk and buffer read.
pub use bytes::Bytes;

/// UTF-8 validated byte string returned by the text accessors.
pub use bytestr::ByteStr;

pub use futures_lite::*;
