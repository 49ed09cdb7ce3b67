//! Decoding of text-encoded document payloads

use crate::error::{Error, Result};
use base64::Engine;

/// Decode a base64 document payload.
///
/// ASCII whitespace anywhere in the payload is ignored so that line-wrapped
/// MIME output decodes the same as a single-line string. A missing or empty
/// payload is an invalid request rather than a decode failure.
pub fn decode_base64(encoded: Option<&str>) -> Result<Vec<u8>> {
    let encoded = encoded.ok_or_else(Error::missing_document)?;

    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(Error::missing_document());
    }

    let data = base64::engine::general_purpose::STANDARD.decode(compact.as_bytes())?;
    if data.is_empty() {
        return Err(Error::missing_document());
    }

    Ok(data)
}

/// Encode bytes for a response payload
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
