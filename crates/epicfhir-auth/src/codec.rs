//! Unpadded, URL-safe base64 as used by JWS, JWK and PKCE (RFC 7515 §2).

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Encodes bytes as base64url without padding.
#[must_use]
pub fn encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes an unpadded base64url string.
///
/// # Errors
///
/// Returns an error if the input contains characters outside the URL-safe
/// alphabet, carries padding, or has an impossible length.
pub fn decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded)
}
