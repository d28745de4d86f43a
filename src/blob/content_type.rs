use tracing::trace;

/// Normalizes a blob type.
///
/// Anything outside printable ASCII, or anything that does not parse as a
/// MIME type, becomes the empty type. Everything else is lowercased.
pub(crate) fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if !raw.chars().all(|c| ('\u{20}'..='\u{7e}').contains(&c)) {
        trace!(content_type = ?raw, "dropping non-printable blob type");
        return String::new();
    }
    if raw.parse::<mime::Mime>().is_err() {
        trace!(content_type = %raw, "dropping unparseable blob type");
        return String::new();
    }
    raw.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn lowercases_valid_types() {
        assert_eq!(normalize("Text/HTML;Charset=UTF-8"), "text/html;charset=utf-8");
        assert_eq!(normalize("image/png"), "image/png");
    }

    #[test]
    fn drops_invalid_types() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("text/plain\u{7}"), "");
        assert_eq!(normalize("tëxt/plain"), "");
        assert_eq!(normalize("not a type"), "");
    }
}
