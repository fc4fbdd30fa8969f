//! Message catalogue and payload access helpers.
//!
//! Every frame on the wire carries one opcode and one self-describing
//! payload object. Payloads are heterogeneous nested maps; the accessors
//! here are lenient about scalar encodings because the bridge firmware
//! mixes numbers, numeric strings and booleans for the same field family.

use serde_json::Value;

/// Message kinds spoken by the bridge. Unknown values are preserved in
/// `Other` so they can still reach the dispatcher's debug path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Ack,
    Heartbeat,
    ActionSwitchDevice,
    ActionSlideDevice,
    SetAllData,
    SetDeviceState,
    SetHeatingState,
    SetDeviceShadingState,
    SetStateInfo,
    Other(u16),
}

impl Opcode {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Opcode::Ack,
            2 => Opcode::Heartbeat,
            240 => Opcode::ActionSwitchDevice,
            241 => Opcode::ActionSlideDevice,
            300 => Opcode::SetAllData,
            310 => Opcode::SetDeviceState,
            350 => Opcode::SetHeatingState,
            420 => Opcode::SetDeviceShadingState,
            550 => Opcode::SetStateInfo,
            other => Opcode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Opcode::Ack => 1,
            Opcode::Heartbeat => 2,
            Opcode::ActionSwitchDevice => 240,
            Opcode::ActionSlideDevice => 241,
            Opcode::SetAllData => 300,
            Opcode::SetDeviceState => 310,
            Opcode::SetHeatingState => 350,
            Opcode::SetDeviceShadingState => 420,
            Opcode::SetStateInfo => 550,
            Opcode::Other(other) => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Ack => "ACK",
            Opcode::Heartbeat => "HEARTBEAT",
            Opcode::ActionSwitchDevice => "ACTION_SWITCH_DEVICE",
            Opcode::ActionSlideDevice => "ACTION_SLIDE_DEVICE",
            Opcode::SetAllData => "SET_ALL_DATA",
            Opcode::SetDeviceState => "SET_DEVICE_STATE",
            Opcode::SetHeatingState => "SET_HEATING_STATE",
            Opcode::SetDeviceShadingState => "SET_DEVICE_SHADING_STATE",
            Opcode::SetStateInfo => "SET_STATE_INFO",
            Opcode::Other(_) => "UNKNOWN",
        }
    }
}

/// Shading command states accepted by `SET_DEVICE_SHADING_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShadeOperationState {
    Open = 1,
    Close = 2,
    Stop = 3,
    GoTo = 4,
}

/// One decoded unit of the protocol: opcode plus payload object.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub opcode: Opcode,
    pub payload: Value,
}

impl Message {
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }
}

/// Typed accessors over the payload tree.
pub mod payload {
    use serde_json::{Map, Value};

    pub fn get<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
        payload.as_object().and_then(|map| map.get(key))
    }

    pub fn has(payload: &Value, key: &str) -> bool {
        get(payload, key).is_some()
    }

    pub fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
        get(payload, key).and_then(Value::as_str)
    }

    pub fn get_u32(payload: &Value, key: &str) -> Option<u32> {
        get(payload, key)
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
    }

    /// Integer view of a scalar that may arrive as a number, a numeric
    /// string or a boolean.
    pub fn as_i64_lenient(value: &Value) -> Option<i64> {
        match value {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => text.trim().parse().ok(),
            Value::Bool(flag) => Some(i64::from(*flag)),
            _ => None,
        }
    }

    pub fn get_i64_lenient(payload: &Value, key: &str) -> Option<i64> {
        get(payload, key).and_then(as_i64_lenient)
    }

    /// Float view with the same string tolerance.
    pub fn as_f64_lenient(value: &Value) -> Option<f64> {
        match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64_lenient(payload: &Value, key: &str) -> Option<f64> {
        get(payload, key).and_then(as_f64_lenient)
    }

    pub fn get_bool(payload: &Value, key: &str) -> Option<bool> {
        get(payload, key).and_then(|value| match value {
            Value::Bool(flag) => Some(*flag),
            other => as_i64_lenient(other).map(|number| number != 0),
        })
    }

    /// Shallow last-writer-wins merge of `update` into `retained`. Arrays
    /// and nested objects are replaced wholesale, mirroring how the bridge
    /// resends complete sub-structures.
    pub fn merge_object(retained: &mut Value, update: &Value) {
        let Some(incoming) = update.as_object() else {
            return;
        };
        if !retained.is_object() {
            *retained = Value::Object(Map::new());
        }
        if let Some(target) = retained.as_object_mut() {
            for (key, value) in incoming {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opcode_round_trips_known_and_unknown() {
        for opcode in [
            Opcode::Ack,
            Opcode::Heartbeat,
            Opcode::ActionSwitchDevice,
            Opcode::ActionSlideDevice,
            Opcode::SetAllData,
            Opcode::SetDeviceState,
            Opcode::SetHeatingState,
            Opcode::SetDeviceShadingState,
            Opcode::SetStateInfo,
        ] {
            assert_eq!(Opcode::from_u16(opcode.as_u16()), opcode);
        }
        assert_eq!(Opcode::from_u16(9999), Opcode::Other(9999));
    }

    #[test]
    fn lenient_integers_accept_mixed_encodings() {
        let value = json!({"a": 1, "b": "1", "c": true, "d": " 2 ", "e": [1]});
        assert_eq!(payload::get_i64_lenient(&value, "a"), Some(1));
        assert_eq!(payload::get_i64_lenient(&value, "b"), Some(1));
        assert_eq!(payload::get_i64_lenient(&value, "c"), Some(1));
        assert_eq!(payload::get_i64_lenient(&value, "d"), Some(2));
        assert_eq!(payload::get_i64_lenient(&value, "e"), None);
    }

    #[test]
    fn merge_is_shallow_and_last_writer_wins() {
        let mut retained = json!({"switch": true, "dimmvalue": 60, "info": [1, 2]});
        payload::merge_object(&mut retained, &json!({"switch": false, "info": [3]}));
        assert_eq!(retained, json!({"switch": false, "dimmvalue": 60, "info": [3]}));
    }

    #[test]
    fn merge_into_non_object_replaces() {
        let mut retained = Value::Null;
        payload::merge_object(&mut retained, &json!({"shPos": 40}));
        assert_eq!(retained, json!({"shPos": 40}));
    }
}
