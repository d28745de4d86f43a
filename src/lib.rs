#![deny(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations)]
//! Bodies, blobs, form data and a redirect-following `fetch` for code running
//! inside a sandboxed isolate.
//!
//! The isolate owns no sockets and no large memory. Everything that touches
//! the outside world goes through a narrow [`Host`](host::Host) boundary:
//! opaque byte buffers, pull streams identified by id, a multipart parser and
//! a single `dispatch` call per HTTP exchange. This crate builds the familiar
//! web surface on top of that boundary:
//!
//! - [`Blob`] - an immutable, sliceable concatenation of host buffers and
//!   stream-backed parts.
//! - [`ByteStream`] - the pull stream bridge, including [`ByteStream::tee`].
//! - [`FormData`] - the `multipart/form-data` model and codec.
//! - [`Body`], [`Request`], [`Response`] - one-shot bodies and the
//!   [`Envelope`] accessors shared by both message types.
//! - [`fetch`] and [`Client`] - the redirect pipeline.
//! - [`AbortController`] - advisory cancellation, bridged to the host as a
//!   stream that closes when the signal fires.
//!
//! Everything is single-threaded. Shared state lives in `Rc<RefCell<_>>` and
//! asynchrony is driven by the embedder's run loop; [`host::LocalHost`] is an
//! in-process implementation used for tests and examples.
//!
//! # Optional Features
//!
//! - `form` - url-encoded bodies via `serde_urlencoded` (enabled by default)
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::host::LocalHost;
//! use isolate_fetch::{Blob, FormData};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> isolate_fetch::Result<()> {
//! let host = LocalHost::new();
//! host.run(async {
//!     let mut form = FormData::new();
//!     form.append("greeting", "hello");
//!     form.append_blob("upload", Blob::new(["file contents"], "text/plain")?, Some("a.txt"));
//!
//!     let encoded = form.encode()?;
//!     let decoded = FormData::decode(&encoded, Some(encoded.content_type())).await?;
//!     assert_eq!(decoded.get("greeting").and_then(|v| v.as_text()), Some("hello"));
//!     assert_eq!(decoded.get("upload").and_then(|v| v.filename()), Some("a.txt"));
//!     Ok(())
//! })
//! .await
//! # }
//! ```

#[macro_use]
mod macros;

pub mod error;
pub use error::{ConstructionError, Error, ErrorKind, FetchError, Result, ResultExt};

mod body;
pub use body::Error as BodyError;
pub use body::{Body, BodyState};

pub mod blob;
#[doc(inline)]
pub use blob::{Blob, BlobPart};

pub mod host;

pub mod stream;
#[doc(inline)]
pub use stream::ByteStream;

pub mod form_data;
#[doc(inline)]
pub use form_data::{FormData, FormValue};

pub mod envelope;
#[doc(inline)]
pub use envelope::Envelope;

mod request;
pub use request::Request;

mod response;
pub use response::{Response, ResponseInit};

pub mod redirect;
#[doc(inline)]
pub use redirect::{RedirectError, RedirectPolicy};

pub mod abort;
#[doc(inline)]
pub use abort::{AbortController, AbortSignal};

pub mod fetch;
#[doc(inline)]
pub use fetch::{fetch, Client};

pub mod utils;

pub use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
pub use url::Url;
