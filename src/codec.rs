//! CBOR frame codec.
//!
//! A frame body is a two-entry CBOR map: `"t"` carries the opcode and
//! `"p"` the payload object. The codec is total over well-formed input;
//! anything else is a `CodecError` and the caller drops the frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::messages::{Message, Opcode};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame encode: {0}")]
    Encode(String),
    #[error("frame decode: {0}")]
    Decode(String),
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    t: u16,
    p: Value,
}

pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let wire = WireMessage {
        t: message.opcode.as_u16(),
        p: message.payload.clone(),
    };
    serde_cbor::to_vec(&wire).map_err(|err| CodecError::Encode(err.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let wire: WireMessage =
        serde_cbor::from_slice(bytes).map_err(|err| CodecError::Decode(err.to_string()))?;
    Ok(Message::new(Opcode::from_u16(wire.t), wire.p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_nested_payloads() {
        let message = Message::new(
            Opcode::SetAllData,
            json!({
                "devices": [{"deviceId": 7, "devType": 101, "name": "Lamp", "dimmable": true}],
                "rooms": [{"roomId": 1, "name": "Hall"}],
                "lastItem": true,
            }),
        );
        let decoded = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_unknown_opcodes() {
        let message = Message::new(Opcode::Other(777), json!({"x": [1, "2", null]}));
        let decoded = decode(&encode(&message).unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode(&[0xde, 0xad, 0xbe, 0xef]),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn rejects_wrong_shape() {
        let bytes = serde_cbor::to_vec(&json!(["not", "a", "map"])).unwrap();
        assert!(decode(&bytes).is_err());
    }
}
