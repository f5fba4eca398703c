//! Sanity checks on crawled content before it is ingested.

use thiserror::Error;
use url::Url;

/// Pages with less trimmed text than this are not worth indexing.
pub const MIN_CONTENT_CHARS: usize = 10;
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContentRejection {
    #[error("content contains script tags")]
    ScriptTag,
    #[error("content too short")]
    TooShort,
    #[error("content of {0} bytes exceeds the {MAX_CONTENT_BYTES} byte limit")]
    TooLarge(usize),
}

pub fn validate_content(text: &str) -> Result<(), ContentRejection> {
    if text.len() > MAX_CONTENT_BYTES {
        return Err(ContentRejection::TooLarge(text.len()));
    }
    if text.to_ascii_lowercase().contains("<script") {
        return Err(ContentRejection::ScriptTag);
    }
    if text.trim().chars().count() < MIN_CONTENT_CHARS {
        return Err(ContentRejection::TooShort);
    }
    Ok(())
}

/// Absolute URL with a scheme and a host.
pub fn is_valid_url(s: &str) -> bool {
    Url::parse(s).map(|u| u.has_host()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_text() {
        assert_eq!(validate_content("A perfectly ordinary paragraph."), Ok(()));
    }

    #[test]
    fn rejects_scripts_short_and_huge() {
        assert_eq!(
            validate_content("hello <SCRIPT src=x></script> world"),
            Err(ContentRejection::ScriptTag)
        );
        assert_eq!(validate_content("   tiny   "), Err(ContentRejection::TooShort));
        let huge = "a".repeat(MAX_CONTENT_BYTES + 1);
        assert_eq!(validate_content(&huge), Err(ContentRejection::TooLarge(MAX_CONTENT_BYTES + 1)));
    }

    #[test]
    fn url_checks() {
        assert!(is_valid_url("https://example.com/page?q=1"));
        assert!(!is_valid_url("example.com/page"));
        assert!(!is_valid_url("mailto:someone@example.com"));
        assert!(!is_valid_url(""));
    }
}
