//! URL-safe movie id encoding
//!
//! Hides raw title (`tt…`) and knowledge-base (`Q…`) ids in page URLs. The
//! encoding is reversible without secrets (URL-safe base64, no padding).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encode a raw id for use in a URL path segment; empty for blank input
pub fn encode_movie_id(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        return String::new();
    }
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Decode a URL path segment back to the raw id
///
/// Returns `None` when the segment is not valid base64 or not UTF-8.
pub fn decode_movie_id(encoded: &str) -> Option<String> {
    let encoded = encoded.trim().trim_end_matches('=');
    if encoded.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let decoded = decoded.trim();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}
