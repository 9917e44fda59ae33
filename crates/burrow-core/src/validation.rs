//! Character-set and length rules shared by urls and short ids.

use crate::error::ValidationError;

/// Maximum accepted length of a source url, in bytes.
pub const MAX_URL_LENGTH: usize = 2048;

/// Symbols allowed by RFC 3986 besides ASCII letters and digits.
const RFC3986_SYMBOLS: &str = ":/?#[]@!$&'()*+,;=-_.~%";

/// Returns `true` when every character of `value` belongs to the RFC 3986 set.
pub fn is_rfc3986(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || RFC3986_SYMBOLS.contains(c))
}

/// Validates a source url: non-empty, at most [`MAX_URL_LENGTH`] bytes, RFC 3986 characters.
pub fn validate_url(url: &str) -> Result<(), ValidationError> {
    if url.is_empty() {
        return Err(ValidationError::InvalidUrl("url cannot be empty".to_string()));
    }

    if url.len() > MAX_URL_LENGTH {
        return Err(ValidationError::InvalidUrl(format!(
            "length must be at most {}, got {}",
            MAX_URL_LENGTH,
            url.len()
        )));
    }

    if !is_rfc3986(url) {
        return Err(ValidationError::InvalidUrl(format!(
            "must contain only RFC 3986 characters: '{}'",
            url
        )));
    }

    Ok(())
}
