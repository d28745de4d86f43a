//! A small `multipart/form-data` parser backing [`LocalHost`](super::LocalHost).
//!
//! Handles what [`FormData::encode`](crate::FormData) and ordinary user agents
//! produce: CRLF delimiters, a `Content-Disposition: form-data` header with
//! quoted `name`/`filename` parameters and an optional `Content-Type`.

use bytes::Bytes;

use super::MultipartEntry;

pub(super) fn parse(body: &Bytes, boundary: &str) -> Result<Vec<MultipartEntry>, String> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut pos = find(body, delimiter, 0).ok_or("missing opening boundary")?;
    let mut entries = Vec::new();
    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(entries);
        }
        // Transport padding after a delimiter is ignored.
        while matches!(body.get(pos), Some(b' ' | b'\t')) {
            pos += 1;
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err("boundary not followed by CRLF".into());
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos).ok_or("unterminated part headers")?;
        let headers = core::str::from_utf8(&body[pos..header_end])
            .map_err(|_| "part headers are not UTF-8")?;
        let content_start = header_end + 4;

        let mut closing = Vec::with_capacity(delimiter.len() + 2);
        closing.extend_from_slice(b"\r\n");
        closing.extend_from_slice(delimiter);
        let content_end = find(body, &closing, content_start).ok_or("unterminated part")?;

        entries.push(entry(headers, body.slice(content_start..content_end))?);
        pos = content_end + 2;
    }
}

fn entry(headers: &str, data: Bytes) -> Result<MultipartEntry, String> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for (param, param_value) in params(value) {
                match param.to_ascii_lowercase().as_str() {
                    "name" => name = Some(param_value),
                    "filename" => filename = Some(param_value),
                    _ => {}
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_owned());
        }
    }
    Ok(MultipartEntry {
        name: name.ok_or("part without a name")?,
        filename,
        content_type,
        data,
    })
}

// `form-data; name="a"; filename="b.txt"`, honoring quotes around `;`.
fn params(value: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = value;
    while let Some(idx) = rest.find(';') {
        rest = rest[idx + 1..].trim_start();
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq + 1..];
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            out.push((key, quoted[..end].to_owned()));
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            out.push((key, rest[..end].trim().to_owned()));
            rest = &rest[end..];
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_file_parts() {
        let body = Bytes::from_static(
            b"--xyz\r\n\
              Content-Disposition: form-data; name=\"a\"\r\n\r\n\
              1\r\n\
              --xyz\r\n\
              Content-Disposition: form-data; name=\"f\"; filename=\"x;y.txt\"\r\n\
              Content-Type: text/plain\r\n\r\n\
              hi\r\n\
              --xyz--\r\n",
        );
        let entries = parse(&body, "xyz").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].data, "1");
        assert!(entries[0].filename.is_none());
        assert_eq!(entries[1].filename.as_deref(), Some("x;y.txt"));
        assert_eq!(entries[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(entries[1].data, "hi");
    }

    #[test]
    fn skips_preamble_and_padding() {
        let body = Bytes::from_static(
            b"Preamble\r\n--b\t \r\n\
              Content-Disposition: form-data; name=\"x\"\r\n\r\n\
              y\r\n--b--\r\nEpilogue",
        );
        let entries = parse(&body, "b").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, "y");
    }

    #[test]
    fn rejects_truncated_body() {
        let body = Bytes::from_static(b"--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1");
        assert!(parse(&body, "xyz").is_err());
    }
}
