//! Opaque feed cursors
//!
//! A cursor is `v1:` followed by the standard base64 of the decimal boundary
//! timestamp plus a fixed offset. The offset only hides the raw timestamp; it
//! does not authenticate anything.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const CURSOR_VERSION: &str = "v1";
const CURSOR_SALT: i128 = 42069;

/// Encode a timestamp boundary as a cursor token
pub fn encode_cursor(timestamp: i64) -> String {
    // Widened so every i64 timestamp survives the offset
    let salted = (i128::from(timestamp) + CURSOR_SALT).to_string();
    format!("{}:{}", CURSOR_VERSION, STANDARD.encode(salted))
}

/// Decode a cursor token, or `None` if it is malformed or from another version
pub fn decode_cursor(token: &str) -> Option<i64> {
    let Some((version, payload)) = token.split_once(':') else {
        tracing::debug!(cursor = token, "Cursor has no version tag");
        return None;
    };
    if version != CURSOR_VERSION {
        tracing::debug!(cursor = token, version, "Cursor version mismatch");
        return None;
    }

    let decoded = STANDARD.decode(payload).ok()?;
    let salted: i128 = std::str::from_utf8(&decoded).ok()?.parse().ok()?;
    i64::try_from(salted - CURSOR_SALT).ok()
}
