//! Newline-delimited JSON framing.
//!
//! Each frame is one JSON object on one line. Frames larger than
//! [`MAX_MESSAGE_SIZE`] are rejected on both ends, and a frame from an
//! incompatible protocol major version is refused.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::bootstrap::Handshake;
use crate::message::{ControlMessage, Envelope};
use crate::version::ProtocolVersion;

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Errors from encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame exceeds [`MAX_MESSAGE_SIZE`]
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Frame is not valid JSON for the expected type
    #[error("Failed to parse message: {0}")]
    Parse(#[from] serde_json::Error),

    /// Peer speaks an incompatible protocol version
    #[error("Protocol version mismatch (local: {local}, remote: {remote})")]
    VersionMismatch {
        local: ProtocolVersion,
        remote: ProtocolVersion,
    },
}

/// Encodes a message as one line (without the trailing newline).
pub fn encode(message: &ControlMessage) -> Result<String, FrameError> {
    encode_value(&Envelope::new(message.clone()))
}

/// Decodes one line into a message.
///
/// # Errors
///
/// Fails for oversized frames, malformed JSON or an incompatible version.
pub fn decode(line: &str) -> Result<ControlMessage, FrameError> {
    let envelope: Envelope = decode_value(line)?;
    check_version(envelope.protocol_version)?;
    Ok(envelope.message)
}

/// Encodes the handshake sent to a process worker.
pub fn encode_handshake(handshake: &Handshake) -> Result<String, FrameError> {
    encode_value(handshake)
}

/// Decodes the handshake line read by a process worker.
pub fn decode_handshake(line: &str) -> Result<Handshake, FrameError> {
    let handshake: Handshake = decode_value(line)?;
    check_version(handshake.protocol_version)?;
    Ok(handshake)
}

fn encode_value<T: Serialize>(value: &T) -> Result<String, FrameError> {
    let json = serde_json::to_string(value)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

fn decode_value<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(serde_json::from_str(line)?)
}

fn check_version(remote: ProtocolVersion) -> Result<(), FrameError> {
    if ProtocolVersion::CURRENT.accepts(&remote) {
        Ok(())
    } else {
        Err(FrameError::VersionMismatch {
            local: ProtocolVersion::CURRENT,
            remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn test_encode_is_single_line() {
        let line = encode(&ControlMessage::command(1, Command::Play)).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode(&line).unwrap(), ControlMessage::command(1, Command::Play));
    }

    #[test]
    fn test_decode_tolerates_line_ending() {
        let line = encode(&ControlMessage::command(2, Command::Stop)).unwrap();
        let msg = decode(&format!("{line}\r\n")).unwrap();
        assert_eq!(msg, ControlMessage::command(2, Command::Stop));
    }

    #[test]
    fn test_decode_rejects_major_mismatch() {
        let line = r#"{"protocol_version":"2.0","type":"command","seq":1,"command":{"kind":"play"}}"#;
        assert!(matches!(
            decode(line),
            Err(FrameError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let line = "x".repeat(MAX_MESSAGE_SIZE + 1);
        assert!(matches!(decode(&line), Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("{ invalid json }"), Err(FrameError::Parse(_))));
    }
}
