//! Content-type lookup for object keys.

/// Content type used when the extension is unknown or missing
pub const FALLBACK_CONTENT_TYPE: &str = "text/plain";

/// Guess the content type of an object from its key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}
