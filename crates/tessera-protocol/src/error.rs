//! Error types for the protocol layer.
//!
//! A `ProtocolError` always concerns one message: the frame that caused it is
//! dropped and the connection carries on.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, or an
    /// unknown `type` tag.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The peer speaks a different protocol version.
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    /// The message decoded but is not valid here, e.g. a lobby request
    /// before the handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
