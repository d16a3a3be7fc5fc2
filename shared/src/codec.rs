//! Frame encoding for protocol messages.
//!
//! Text frames carry JSON and binary frames carry bincode. A peer decodes by
//! frame type, so each side is free to pick its own encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid binary message: {0}")]
    Binary(#[from] bincode::Error),
}

/// Encoding used for outgoing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

/// One transport message, independent of the WebSocket library in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn encode<T: Serialize>(message: &T, format: WireFormat) -> Result<Self, ProtocolError> {
        Ok(match format {
            WireFormat::Json => Frame::Text(serde_json::to_string(message)?),
            WireFormat::Binary => Frame::Binary(bincode::serialize(message)?),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(match self {
            Frame::Text(text) => serde_json::from_str(text)?,
            Frame::Binary(bytes) => bincode::deserialize(bytes)?,
        })
    }

    /// The encoding a frame was written in.
    pub fn format(&self) -> WireFormat {
        match self {
            Frame::Text(_) => WireFormat::Json,
            Frame::Binary(_) => WireFormat::Binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Appearance, ClientMessage, ConnectionId, Participant, Position, ServerMessage};

    #[test]
    fn test_encode_json_is_text() {
        let frame = Frame::encode(&ClientMessage::Leave, WireFormat::Json).unwrap();
        assert_eq!(frame, Frame::Text("\"leave\"".to_string()));
        assert_eq!(frame.format(), WireFormat::Json);
    }

    #[test]
    fn test_binary_frame_decodes_session_view() {
        let view = ServerMessage::SessionView {
            participants: vec![Participant {
                id: ConnectionId(1),
                display_name: "A".to_string(),
                appearance: Appearance::Red,
                position: Position::new(12.5, 40.0),
            }],
        };

        let frame = Frame::encode(&view, WireFormat::Binary).unwrap();
        assert_eq!(frame.format(), WireFormat::Binary);

        match frame.decode::<ServerMessage>().unwrap() {
            ServerMessage::SessionView { participants } => {
                assert_eq!(participants.len(), 1);
                assert_eq!(participants[0].display_name, "A");
                assert_eq!(participants[0].position, Position::new(12.5, 40.0));
            }
            _ => panic!("Wrong message type after decoding"),
        }
    }

    #[test]
    fn test_binary_join_keeps_account() {
        let join = ClientMessage::Join {
            display_name: "C".to_string(),
            appearance: Appearance::Yellow,
            account: Some("user-17".to_string()),
        };

        let decoded: ClientMessage = Frame::encode(&join, WireFormat::Binary)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(decoded, join);
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        let text = Frame::Text("{\"join\":".to_string());
        assert!(matches!(
            text.decode::<ClientMessage>(),
            Err(ProtocolError::Json(_))
        ));

        let unknown = Frame::Text("{\"teleport\":{}}".to_string());
        assert!(unknown.decode::<ClientMessage>().is_err());

        let empty = Frame::Binary(Vec::new());
        assert!(matches!(
            empty.decode::<ClientMessage>(),
            Err(ProtocolError::Binary(_))
        ));

        let corrupted = Frame::Binary(vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(corrupted.decode::<ClientMessage>().is_err());
    }

    #[test]
    fn test_non_finite_position_cannot_be_json_encoded() {
        let message = ClientMessage::Move {
            position: Position::new(f32::NAN, 0.0),
        };
        // serde_json writes NaN as null, which no longer decodes as a number.
        let frame = Frame::encode(&message, WireFormat::Json).unwrap();
        assert!(frame.decode::<ClientMessage>().is_err());
    }
}
