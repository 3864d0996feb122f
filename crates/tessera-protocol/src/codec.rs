//! Codec trait and implementations for serializing/deserializing messages.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! Nothing above this module cares HOW messages are serialized; it only
//! needs something that implements [`Codec`]. The server and the client are
//! generic over it, so a compact binary codec can replace [`JsonCodec`]
//! without touching either.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps frames readable in logs and lets non-Rust clients speak the
/// protocol with nothing but a JSON library.
///
/// ## Example
///
/// ```rust
/// use tessera_protocol::{
///     Codec, Envelope, JsonCodec, Payload, PlayerId, SystemMessage,
/// };
///
/// let codec = JsonCodec;
/// let envelope: Envelope<()> = Envelope {
///     seq: 1,
///     timestamp: 5000,
///     payload: Payload::System(SystemMessage::Handshake {
///         version: 1,
///         player_id: PlayerId::from("ana"),
///         name: "Ana".into(),
///     }),
/// };
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope<()> = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, GameMessage, Payload, PlayerId};

    #[test]
    fn test_decode_garbage_is_a_decode_error() {
        let result: Result<Envelope<()>, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_unknown_game_type_is_rejected() {
        let frame = br#"{"seq":1,"timestamp":0,"payload":{"type":"Game","data":{"type":"FLY_TO_MOON"}}}"#;
        let result: Result<Envelope<()>, _> = JsonCodec.decode(frame);
        assert!(result.is_err());
    }

    #[test]
    fn test_game_payload_survives_codec() {
        let envelope: Envelope<()> = Envelope {
            seq: 9,
            timestamp: 10,
            payload: Payload::Game(GameMessage::Chat {
                player_id: PlayerId::from("ana"),
                text: "gl hf".into(),
            }),
        };
        let bytes = JsonCodec.encode(&envelope).unwrap();
        let decoded: Envelope<()> = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }
}
