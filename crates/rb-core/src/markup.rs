//! Post markup.
//!
//! Content is sanitized once on ingest so every stored and cached copy is
//! safe to serve.

const QUOTE_PREFIX: &str = "&gt;";

/// Escapes a submission and renders its greentext lines.
///
/// Trailing whitespace is trimmed before escaping so the same text typed
/// with or without a final newline sanitizes identically; duplicate checks
/// rely on that. Lines are joined with `<br />` and the result holds no
/// raw newlines.
pub fn sanitize_content(raw: &str) -> String {
    html_escape::encode_safe(raw.trim_end())
        .lines()
        .map(|line| {
            if line.starts_with(QUOTE_PREFIX) {
                format!("<span class=\"greentext\">{line}</span>")
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("<br />")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        let clean = sanitize_content("<script>alert(1)</script>");
        assert!(clean.starts_with("&lt;script&gt;alert(1)"));
        assert!(!clean.contains('<'));
    }

    #[test]
    fn greentext_and_line_breaks() {
        assert_eq!(
            sanitize_content(">be me\nhello"),
            "<span class=\"greentext\">&gt;be me</span><br />hello"
        );
    }

    #[test]
    fn trailing_whitespace_does_not_change_the_result() {
        assert_eq!(sanitize_content("same\n\n"), sanitize_content("same"));
        assert!(!sanitize_content("a\r\nb").contains('\n'));
    }
}
