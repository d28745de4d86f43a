//! Behaviour shared by [`Request`](crate::Request) and [`Response`](crate::Response).
//!
//! Both carry a header map and at most one [`Body`]. The consumption accessors
//! defined here read the body once, interpreting it with the envelope's
//! `Content-Type` where that matters (blobs and form data).
//!
//! ```rust
//! use isolate_fetch::{Envelope, Response};
//!
//! # async fn example() -> isolate_fetch::Result<()> {
//! let mut response = Response::json(&serde_json::json!({ "ok": true }))?;
//! assert_eq!(response.content_type(), Some("application/json"));
//! let value: serde_json::Value = response.json().await?;
//! assert_eq!(value["ok"], true);
//! assert!(response.body_used());
//! # Ok(())
//! # }
//! ```
use bytes::Bytes;
use bytestr::ByteStr;
use http::header::CONTENT_TYPE;
use http::HeaderMap;

use crate::{Blob, Body, BodyError, FormData};

/// A header map plus a one-shot body.
#[allow(async_fn_in_trait)]
pub trait Envelope {
    /// The headers.
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// The body.
    fn body(&self) -> &Body;

    /// Mutable access to the body.
    fn body_mut(&mut self) -> &mut Body;

    /// The `Content-Type` header, if present and visible ASCII.
    fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Whether the body has been (or is being) read.
    fn body_used(&self) -> bool {
        self.body().is_used()
    }

    /// Reads the body as bytes.
    async fn bytes(&mut self) -> Result<Bytes, BodyError> {
        self.body_mut().bytes().await
    }

    /// Reads the body as text, replacing invalid UTF-8.
    async fn text(&mut self) -> Result<ByteStr, BodyError> {
        self.body_mut().text().await
    }

    /// Reads the body as JSON. A null body parses as JSON `null`.
    async fn json<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, BodyError> {
        self.body_mut().json().await
    }

    /// Reads the body into a [`Blob`] typed by the `Content-Type` header.
    async fn blob(&mut self) -> Result<Blob, BodyError> {
        let content_type = self.content_type().unwrap_or_default().to_owned();
        let blob = self.body_mut().blob().await?;
        Ok(blob.with_type(&content_type))
    }

    /// Reads the body and decodes it as form fields according to the
    /// `Content-Type` header.
    async fn form_data(&mut self) -> crate::Result<FormData> {
        let content_type = self.content_type().map(str::to_owned);
        self.body_mut().form_data(content_type.as_deref()).await
    }
}
