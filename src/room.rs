//! Room heating model.
//!
//! Rooms aggregate partial heating payloads into a typed state and expose
//! the two climate commands: a clamped target temperature for the active
//! mode, and a mode switch that recalls the last known setpoint of the
//! target mode.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::bridge::{BridgeHandle, CommandError};
use crate::devices::ModelError;
use crate::messages::{payload, Opcode};
use crate::subject::Subject;

/// Heating operating mode. Each mode constrains the setpoint to a fixed
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RctMode {
    Cool,
    Eco,
    Comfort,
}

/// Allowed setpoint interval for one mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointRange {
    pub min: f64,
    pub max: f64,
}

impl SetpointRange {
    pub fn clamp(&self, setpoint: f64) -> f64 {
        setpoint.clamp(self.min, self.max)
    }
}

impl RctMode {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(RctMode::Cool),
            2 => Some(RctMode::Eco),
            3 => Some(RctMode::Comfort),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            RctMode::Cool => 1,
            RctMode::Eco => 2,
            RctMode::Comfort => 3,
        }
    }

    pub fn setpoint_range(self) -> SetpointRange {
        match self {
            RctMode::Cool => SetpointRange { min: 5.0, max: 20.0 },
            RctMode::Eco => SetpointRange { min: 10.0, max: 30.0 },
            RctMode::Comfort => SetpointRange { min: 18.0, max: 40.0 },
        }
    }
}

/// Whether the heating loop is currently demanding heat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RctState {
    Idle,
    Active,
}

impl RctState {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(RctState::Idle),
            2 => Some(RctState::Active),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            RctState::Idle => 0,
            RctState::Active => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub setpoint: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub power: f64,
    pub mode: RctMode,
    pub state: RctState,
}

/// A heated room as announced by the bridge.
#[derive(Debug)]
pub struct Room {
    room_id: u32,
    name: String,
    bridge: BridgeHandle,
    payload: Mutex<Value>,
    setpoints_by_mode: Mutex<HashMap<RctMode, f64>>,
    state: Subject<RoomState>,
}

impl Room {
    pub(crate) fn new(bridge: BridgeHandle, room_id: u32, name: String) -> Arc<Self> {
        Arc::new(Self {
            room_id,
            name,
            bridge,
            payload: Mutex::new(Value::Null),
            setpoints_by_mode: Mutex::new(HashMap::new()),
            state: Subject::new(),
        })
    }

    pub fn room_id(&self) -> u32 {
        self.room_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Subject<RoomState> {
        &self.state
    }

    /// Last known setpoint for a mode, learned from `modes` broadcasts and
    /// local target-temperature commands.
    pub fn setpoint_for_mode(&self, mode: RctMode) -> Option<f64> {
        self.setpoints_by_mode.lock().get(&mode).copied()
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };

        if let Some(modes) = payload::get(&merged, "modes").and_then(Value::as_array) {
            let mut setpoints = self.setpoints_by_mode.lock();
            for entry in modes {
                let mode = payload::get_i64_lenient(entry, "mode").and_then(RctMode::from_i64);
                let value = payload::get_f64_lenient(entry, "value");
                if let (Some(mode), Some(value)) = (mode, value) {
                    setpoints.insert(mode, value);
                }
            }
        }

        // `currentMode` wins over `mode` when both are present.
        let mode_raw = payload::get_i64_lenient(&merged, "currentMode")
            .or_else(|| payload::get_i64_lenient(&merged, "mode"))
            .ok_or(ModelError::MissingField("currentMode"))?;
        let mode = RctMode::from_i64(mode_raw).ok_or_else(|| ModelError::InvalidValue {
            field: "currentMode",
            value: mode_raw.to_string(),
        })?;

        let state_raw = payload::get_i64_lenient(&merged, "state")
            .ok_or(ModelError::MissingField("state"))?;
        let state = RctState::from_i64(state_raw).ok_or_else(|| ModelError::InvalidValue {
            field: "state",
            value: state_raw.to_string(),
        })?;

        self.state.publish(RoomState {
            setpoint: payload::get_f64_lenient(&merged, "setpoint"),
            temperature: payload::get_f64_lenient(&merged, "temp"),
            humidity: payload::get_f64_lenient(&merged, "humidity"),
            power: payload::get_f64_lenient(&merged, "power").unwrap_or(0.0),
            mode,
            state,
        });
        Ok(())
    }

    /// Requests a new target temperature for the currently active mode.
    /// The value is clamped to the mode's allowed range before it leaves.
    pub async fn set_target_temperature(&self, setpoint: f64) -> Result<(), CommandError> {
        let current = self.state.last().ok_or(CommandError::NoKnownState)?;
        let clamped = current.mode.setpoint_range().clamp(setpoint);
        self.setpoints_by_mode.lock().insert(current.mode, clamped);
        self.bridge
            .send_command(
                Opcode::SetHeatingState,
                json!({
                    "roomId": self.room_id,
                    "mode": current.mode.as_i64(),
                    "state": current.state.as_i64(),
                    "setpoint": clamped,
                    "confirmed": false,
                }),
            )
            .await
    }

    /// Switches the heating mode, recalling that mode's last known
    /// setpoint. The setpoint is null until the mode has been seen once.
    pub async fn set_mode(&self, mode: RctMode) -> Result<(), CommandError> {
        let current = self.state.last().ok_or(CommandError::NoKnownState)?;
        let setpoint = self.setpoint_for_mode(mode);
        self.bridge
            .send_command(
                Opcode::SetHeatingState,
                json!({
                    "roomId": self.room_id,
                    "mode": mode.as_i64(),
                    "state": current.state.as_i64(),
                    "setpoint": setpoint,
                    "confirmed": false,
                }),
            )
            .await
    }
}
