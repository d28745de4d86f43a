//! Responses, both constructed locally and received from the host.
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::{Body, Response, ResponseInit};
//!
//! # fn main() -> isolate_fetch::Result<()> {
//! let ok = Response::new(Body::from("hello"), ResponseInit::default())?;
//! assert_eq!(ok.status(), 200);
//! assert!(ok.ok());
//!
//! let not_found = Response::new(Body::empty(), ResponseInit::new(404))?;
//! assert!(!not_found.ok());
//!
//! // Null-body statuses refuse content.
//! assert!(Response::new(Body::from("x"), ResponseInit::new(204)).is_err());
//!
//! let moved = Response::redirect("https://example.com/new", 301)?;
//! assert_eq!(moved.headers()["location"], "https://example.com/new");
//! # Ok(())
//! # }
//! ```
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use url::Url;

use crate::error::{ConstructionError, Result};
use crate::host::{AnyHost, BoundaryError, ResponseDescriptor};
use crate::redirect::is_redirect;
use crate::stream::ByteStream;
use crate::{Body, BodyError, Envelope};

/// Status, status text and headers for [`Response::new`].
#[derive(Debug, Clone)]
pub struct ResponseInit {
    /// The status code. Must lie in `200..=599`.
    pub status: u16,
    /// The reason phrase.
    pub status_text: String,
    /// Initial headers.
    pub headers: HeaderMap,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self::new(200)
    }
}

impl ResponseInit {
    /// An init with the given status, an empty text and no headers.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Sets the reason phrase.
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// An HTTP response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Body,
    url: Option<Url>,
    redirected: bool,
}

impl Response {
    /// Creates a response.
    ///
    /// The body's implied content type becomes the `Content-Type` header
    /// unless `init` already sets one.
    ///
    /// # Errors
    ///
    /// - [`ConstructionError::InvalidStatus`] outside `200..=599`.
    /// - [`ConstructionError::InvalidStatusText`] when the text contains a
    ///   line break.
    /// - [`ConstructionError::NullBodyStatus`] for a non-null body with
    ///   status 101, 103, 204, 205 or 304.
    pub fn new(body: impl Into<Body>, init: ResponseInit) -> core::result::Result<Self, ConstructionError> {
        let body = body.into();
        let ResponseInit {
            status,
            status_text,
            mut headers,
        } = init;

        if !(200..=599).contains(&status) {
            return Err(ConstructionError::InvalidStatus(status));
        }
        if status_text.contains(['\r', '\n']) {
            return Err(ConstructionError::InvalidStatusText(status_text));
        }
        if is_null_body_status(status) && !body.is_null() {
            return Err(ConstructionError::NullBodyStatus(status));
        }
        if let Some(content_type) = body.content_type() {
            if !headers.contains_key(CONTENT_TYPE) {
                let value = HeaderValue::from_str(content_type)
                    .map_err(|_| ConstructionError::InvalidHeader(content_type.to_owned()))?;
                headers.insert(CONTENT_TYPE, value);
            }
        }

        Ok(Self {
            status,
            status_text,
            headers,
            body,
            url: None,
            redirected: false,
        })
    }

    /// A `200` response with a JSON body.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let body = Body::from_json(value).map_err(BodyError::from)?;
        Ok(Self::new(body, ResponseInit::default())?)
    }

    /// A bodiless redirect to `url`.
    ///
    /// # Errors
    ///
    /// [`ConstructionError::InvalidStatus`] unless `status` is a redirect
    /// status, [`ConstructionError::InvalidUrl`] when `url` does not parse.
    pub fn redirect(url: &str, status: u16) -> core::result::Result<Self, ConstructionError> {
        if !is_redirect(status) {
            return Err(ConstructionError::InvalidStatus(status));
        }
        let location = Url::parse(url).map_err(|_| ConstructionError::InvalidUrl(url.to_owned()))?;
        let value = HeaderValue::from_str(location.as_str())
            .map_err(|_| ConstructionError::InvalidHeader(location.to_string()))?;
        Self::new(Body::empty(), ResponseInit::new(status).header(LOCATION, value))
    }

    /// A network error: status 0, no headers, null body.
    pub fn error() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            body: Body::empty(),
            url: None,
            redirected: false,
        }
    }

    /// The status code.
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is in `200..=299`.
    pub const fn ok(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }

    /// The reason phrase.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// The final URL after redirects, for fetched responses.
    pub const fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    /// Whether at least one redirect was followed to produce this response.
    pub const fn redirected(&self) -> bool {
        self.redirected
    }

    pub(crate) fn set_redirected(&mut self, redirected: bool) {
        self.redirected = redirected;
    }

    /// Returns the headers.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers mutably.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the body.
    pub const fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the body mutably.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Replaces the body, returning the previous one.
    pub fn replace_body(&mut self, body: impl Into<Body>) -> Body {
        core::mem::replace(&mut self.body, body.into())
    }

    /// Takes the body, leaving a null one behind.
    pub fn take_body(&mut self) -> Body {
        self.body.take()
    }

    /// Duplicates the response. A streaming body is teed.
    pub fn try_clone(&mut self) -> core::result::Result<Self, BodyError> {
        Ok(Self {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.try_clone()?,
            url: self.url.clone(),
            redirected: self.redirected,
        })
    }

    /// Builds a response from what the host returned for `url`.
    ///
    /// `descriptor.url`, when present, overrides `url`. The body reads the
    /// host stream lazily; `content-length` sets its known length.
    pub(crate) fn from_descriptor(host: &AnyHost, descriptor: ResponseDescriptor, url: &Url) -> Result<Self> {
        let mut headers = HeaderMap::with_capacity(descriptor.header_pairs.len());
        for (name, value) in &descriptor.header_pairs {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| BoundaryError::new("dispatch", format!("header name {name:?}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| BoundaryError::new("dispatch", format!("header {name}: {err}")))?;
            headers.append(name, value);
        }

        let status_text = StatusCode::from_u16(descriptor.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or_default()
            .to_owned();

        let body = match descriptor.body_stream_id {
            None => Body::empty(),
            Some(id) => {
                let body = Body::from_stream(ByteStream::from_host(host.clone(), id));
                match content_length(&headers) {
                    Some(length) => body.with_length(length),
                    None => body,
                }
            }
        };

        let url = match descriptor.url {
            Some(raw) => Url::parse(&raw)
                .map_err(|err| BoundaryError::new("dispatch", format!("response url {raw:?}: {err}")))?,
            None => url.clone(),
        };

        Ok(Self {
            status: descriptor.status,
            status_text,
            headers,
            body,
            url: Some(url),
            redirected: false,
        })
    }
}

impl Envelope for Response {
    fn headers(&self) -> &HeaderMap {
        Response::headers(self)
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }

    fn body(&self) -> &Body {
        Response::body(self)
    }

    fn body_mut(&mut self) -> &mut Body {
        Response::body_mut(self)
    }
}

fn is_null_body_status(status: u16) -> bool {
    matches!(status, 101 | 103 | 204 | 205 | 304)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;

    #[test]
    fn status_bounds() {
        for status in [0, 199, 600] {
            assert!(matches!(
                Response::new(Body::empty(), ResponseInit::new(status)),
                Err(ConstructionError::InvalidStatus(s)) if s == status
            ));
        }
        assert!(Response::new(Body::empty(), ResponseInit::new(599)).is_ok());
    }

    #[test]
    fn null_body_statuses() {
        assert!(matches!(
            Response::new("x", ResponseInit::new(304)),
            Err(ConstructionError::NullBodyStatus(304))
        ));
        assert!(Response::new(Body::empty(), ResponseInit::new(204)).is_ok());
    }

    #[test]
    fn status_text_rejects_line_breaks() {
        let init = ResponseInit::new(200).status_text("OK\r\nX-Evil: 1");
        assert!(matches!(
            Response::new(Body::empty(), init),
            Err(ConstructionError::InvalidStatusText(_))
        ));
    }

    #[test]
    fn redirect_requires_redirect_status() {
        assert!(matches!(
            Response::redirect("https://example.com/", 200),
            Err(ConstructionError::InvalidStatus(200))
        ));
        let response = Response::redirect("https://example.com/a b", 307).unwrap();
        assert_eq!(response.status(), 307);
        assert_eq!(response.headers()[LOCATION], "https://example.com/a%20b");
    }

    #[test]
    fn error_response() {
        let response = Response::error();
        assert_eq!(response.status(), 0);
        assert!(!response.ok());
        assert!(response.body().is_null());
    }

    #[tokio::test]
    async fn descriptor_body_reads_host_stream() {
        let local = LocalHost::new();
        let host = local.to_any();
        let id = local.stream_from_chunks(["he", "llo"]).unwrap();
        let descriptor = ResponseDescriptor {
            header_pairs: vec![
                ("content-type".to_owned(), "text/plain".to_owned()),
                ("content-length".to_owned(), "5".to_owned()),
            ],
            status: 404,
            body_stream_id: Some(id),
            url: None,
        };
        let base = Url::parse("https://example.com/missing").unwrap();
        let mut response = Response::from_descriptor(&host, descriptor, &base).unwrap();

        assert_eq!(response.status_text(), "Not Found");
        assert_eq!(response.body().len(), Some(5));
        assert_eq!(response.url(), Some(&base));
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.text().await.unwrap().as_str(), "hello");
    }

    #[test]
    fn descriptor_with_bad_header_is_a_boundary_error() {
        let local = LocalHost::new();
        let descriptor = ResponseDescriptor {
            header_pairs: vec![("bad name".to_owned(), "v".to_owned())],
            status: 200,
            body_stream_id: None,
            url: None,
        };
        let base = Url::parse("https://example.com/").unwrap();
        let err = Response::from_descriptor(&local.to_any(), descriptor, &base).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Boundary);
    }
}
