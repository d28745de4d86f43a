//! Ordered lists of named form fields and their multipart encoding.
//!
//! [`FormData::encode`] produces a `multipart/form-data` [`Blob`] whose file
//! fields reference the original blobs rather than copying them.
//! [`FormData::decode`] goes the other way, delegating the parse to the host.
//!
//! # Examples
//!
//! ```rust
//! use isolate_fetch::host::LocalHost;
//! use isolate_fetch::{Blob, FormData};
//!
//! # async fn example() -> isolate_fetch::Result<()> {
//! let host = LocalHost::new();
//! host.run(async {
//!     let mut form = FormData::new();
//!     form.append("name", "value");
//!     form.append_blob("upload", Blob::new(["data"], "text/plain")?, Some("a.txt"));
//!
//!     let body = form.encode()?;
//!     assert!(body.content_type().starts_with("multipart/form-data; boundary="));
//!
//!     let decoded = FormData::decode(&body, Some(body.content_type())).await?;
//!     assert_eq!(decoded.get("name").and_then(|v| v.as_text()), Some("value"));
//!     Ok::<_, isolate_fetch::Error>(())
//! })
//! .await
//! # }
//! ```
use std::borrow::Cow;

use tracing::trace;

use crate::blob::{Blob, BlobPart};
use crate::error::Result;
use crate::host::{self, AnyHost, MultipartEntry};
use crate::stream::outbound;
use crate::BodyError;

/// The value of a form field.
#[derive(Debug, Clone)]
pub enum FormValue {
    /// A text field.
    Text(String),
    /// A file field.
    File {
        /// The content. Its type becomes the part's `Content-Type`.
        blob: Blob,
        /// The file name sent in `Content-Disposition`.
        filename: String,
    },
}

impl FormValue {
    /// The text, for text fields.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File { .. } => None,
        }
    }

    /// The blob, for file fields.
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Text(_) => None,
            Self::File { blob, .. } => Some(blob),
        }
    }

    /// The file name, for file fields.
    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::File { filename, .. } => Some(filename),
        }
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for FormValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// An ordered multimap of form fields.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    /// Creates an empty field list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a text field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .push((name.into(), FormValue::Text(value.into())));
    }

    /// Appends a file field. Without a filename the file is called `blob`.
    pub fn append_blob(&mut self, name: impl Into<String>, blob: Blob, filename: Option<&str>) {
        self.entries.push((name.into(), file_value(blob, filename)));
    }

    /// Replaces every field called `name` with a single text field, keeping
    /// the position of the first one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_value(name.into(), FormValue::Text(value.into()));
    }

    /// Like [`FormData::set`] for a file field.
    pub fn set_blob(&mut self, name: impl Into<String>, blob: Blob, filename: Option<&str>) {
        self.set_value(name.into(), file_value(blob, filename));
    }

    fn set_value(&mut self, name: String, value: FormValue) {
        match self.entries.iter().position(|(key, _)| *key == name) {
            Some(first) => {
                self.entries[first].1 = value;
                let mut index = 0;
                self.entries.retain(|(key, _)| {
                    let keep = index <= first || *key != name;
                    index += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes every field called `name`.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(key, _)| key != name);
    }

    /// The first field called `name`.
    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Every field called `name`, in order.
    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value)
            .collect()
    }

    /// Whether a field called `name` exists.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// Iterates over all fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the fields as `multipart/form-data` using the current host.
    ///
    /// The boundary is drawn from host randomness. File contents are not
    /// copied: the result references each field's blob.
    pub fn encode(&self) -> Result<Blob> {
        let host = host::current()?;
        self.encode_with(&host)
    }

    /// Like [`FormData::encode`] against an explicit host.
    pub fn encode_with(&self, host: &AnyHost) -> Result<Blob> {
        let boundary = boundary(host)?;
        let mut parts: Vec<BlobPart> = Vec::with_capacity(self.entries.len() * 2 + 1);
        let mut head = String::new();
        for (name, value) in &self.entries {
            head.push_str("--");
            head.push_str(&boundary);
            head.push_str("\r\nContent-Disposition: form-data; name=\"");
            head.push_str(&escape(&normalize_newlines(name)));
            head.push('"');
            match value {
                FormValue::Text(text) => {
                    head.push_str("\r\n\r\n");
                    head.push_str(&normalize_newlines(text));
                    head.push_str("\r\n");
                }
                FormValue::File { blob, filename } => {
                    head.push_str("; filename=\"");
                    head.push_str(&escape(filename));
                    head.push_str("\"\r\nContent-Type: ");
                    head.push_str(match blob.content_type() {
                        "" => "application/octet-stream",
                        content_type => content_type,
                    });
                    head.push_str("\r\n\r\n");
                    parts.push(BlobPart::Text(core::mem::take(&mut head)));
                    parts.push(BlobPart::Blob(blob.clone()));
                    head.push_str("\r\n");
                }
            }
        }
        head.push_str("--");
        head.push_str(&boundary);
        head.push_str("--\r\n");
        parts.push(BlobPart::Text(head));

        let content_type = format!("multipart/form-data; boundary={boundary}");
        trace!(fields = self.entries.len(), %boundary, "encoded form data");
        Ok(Blob::with_host(host, parts, &content_type)?)
    }

    /// Decodes `body` according to `content_type`.
    ///
    /// `multipart/form-data` is parsed by the host's multipart parser and
    /// `application/x-www-form-urlencoded` by its query-pair parser. Anything
    /// else, a missing type, a type that does not parse, or a multipart type
    /// without a boundary, is [`BodyError::MalformedBody`]. A blob whose
    /// content fails while being read fails the decode with that error.
    pub async fn decode(body: &Blob, content_type: Option<&str>) -> Result<FormData> {
        let Some(raw) = content_type else {
            return Err(BodyError::MalformedBody("missing content type".into()).into());
        };
        let mime: mime::Mime = raw
            .parse()
            .map_err(|_| BodyError::MalformedBody(format!("invalid content type {raw:?}")))?;
        let host = host::current()?;

        match mime.essence_str() {
            "multipart/form-data" => {
                if mime.get_param(mime::BOUNDARY).is_none() {
                    return Err(BodyError::MalformedBody(format!(
                        "multipart content type {raw:?} has no boundary"
                    ))
                    .into());
                }
                let pump = outbound::pump(&host, Some(body.stream()))?;
                let parsed = host.parse_multipart(raw, pump.id()).await;
                // A body that failed mid-read may still parse as a shorter form.
                if let Some(err) = pump.take_error() {
                    return Err(err.into());
                }
                let entries = parsed?;
                let mut form = FormData::new();
                for entry in entries {
                    form.push_entry(&host, entry)?;
                }
                Ok(form)
            }
            "application/x-www-form-urlencoded" => {
                let bytes = body.bytes().await?;
                let query = String::from_utf8_lossy(&bytes);
                let mut form = FormData::new();
                for (name, value) in host.search_param_pairs(&query)? {
                    form.entries.push((name, FormValue::Text(value)));
                }
                Ok(form)
            }
            other => Err(BodyError::MalformedBody(format!(
                "cannot decode form data from {other}"
            ))
            .into()),
        }
    }

    fn push_entry(&mut self, host: &AnyHost, entry: MultipartEntry) -> Result<()> {
        let value = match entry.filename {
            Some(filename) => {
                let content_type = entry.content_type.as_deref().unwrap_or_default();
                let blob = Blob::with_host(host, [entry.data], content_type)?;
                FormValue::File { blob, filename }
            }
            None => FormValue::Text(String::from_utf8_lossy(&entry.data).into_owned()),
        };
        self.entries.push((entry.name, value));
        Ok(())
    }
}

fn file_value(blob: Blob, filename: Option<&str>) -> FormValue {
    FormValue::File {
        blob,
        filename: filename.unwrap_or("blob").to_owned(),
    }
}

// Twenty decimal digits after ten dashes, seeded by the host.
fn boundary(host: &AnyHost) -> Result<String> {
    let mut seed = [0u8; 8];
    host.fill_random(&mut seed)?;
    Ok(format!("----------{:020}", u64::from_le_bytes(seed)))
}

fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['\r', '\n', '"']) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .replace('\r', "%0D")
            .replace('\n', "%0A")
            .replace('"', "%22"),
    )
}

// Lone CR and lone LF become CRLF.
fn normalize_newlines(value: &str) -> Cow<'_, str> {
    if !value.contains(['\r', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
