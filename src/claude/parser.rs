//! Line decoder for Claude CLI stream-json output

use thiserror::Error;

use super::message::WireMessage;

/// A line that could not be decoded. Callers drop the line and keep reading.
#[derive(Debug, Error)]
#[error("malformed stream line: {0}")]
pub struct DecodeError(#[from] pub serde_json::Error);

/// Decode one line of CLI output.
///
/// Returns `Ok(None)` for blank lines. Unknown tags at any level decode to
/// `Unknown` variants; `Err` only for malformed JSON or a missing required
/// field.
pub fn decode_line(line: &str) -> Result<Option<WireMessage>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(line)?;
    Ok(Some(WireMessage::from_json(value)?))
}

/// Decode a line, logging and discarding anything malformed
pub fn decode_line_lenient(line: &str) -> Option<WireMessage> {
    match decode_line(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Failed to parse stream event: {} - line: {}", e, line.trim());
            None
        }
    }
}
