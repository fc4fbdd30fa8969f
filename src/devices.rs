//! Device variants and their state aggregation.
//!
//! Devices form a tagged union rather than a hierarchy: every variant
//! carries the stable id, the name, an owned merged copy of the last
//! payload and a [`Subject`] publishing its typed state. The bridge emits
//! partial payloads, so each handler merges before deriving.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::bridge::{BridgeHandle, CommandError};
use crate::messages::{payload, Opcode, ShadeOperationState};
use crate::subject::Subject;

/// Per-entity handler failure. One bad element never aborts a batch; the
/// dispatcher logs these and moves on.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` has unsupported value {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Any device known to the bridge.
#[derive(Debug, Clone)]
pub enum Device {
    Light(Arc<Light>),
    Shade(Arc<Shade>),
    Heater(Arc<Heater>),
    RcTouch(Arc<RcTouch>),
    Rocker(Arc<Rocker>),
    Switch(Arc<Switch>),
    DoorWindowSensor(Arc<DoorWindowSensor>),
    Generic(Arc<GenericDevice>),
}

impl Device {
    pub fn device_id(&self) -> u32 {
        match self {
            Device::Light(device) => device.device_id(),
            Device::Shade(device) => device.device_id(),
            Device::Heater(device) => device.device_id(),
            Device::RcTouch(device) => device.device_id(),
            Device::Rocker(device) => device.device_id(),
            Device::Switch(device) => device.device_id(),
            Device::DoorWindowSensor(device) => device.device_id(),
            Device::Generic(device) => device.device_id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Device::Light(device) => device.name().to_owned(),
            Device::Shade(device) => device.name().to_owned(),
            Device::Heater(device) => device.name().to_owned(),
            Device::RcTouch(device) => device.name().to_owned(),
            Device::Rocker(device) => device.name().to_owned(),
            Device::Switch(device) => device.name().to_owned(),
            Device::DoorWindowSensor(device) => device.name().to_owned(),
            Device::Generic(device) => device.name().to_owned(),
        }
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        match self {
            Device::Light(device) => device.handle_state(update),
            Device::Shade(device) => device.handle_state(update),
            Device::Heater(device) => device.handle_state(update),
            Device::RcTouch(device) => device.handle_state(update),
            Device::Rocker(device) => device.handle_state(update),
            Device::Switch(device) => device.handle_state(update),
            Device::DoorWindowSensor(device) => device.handle_state(update),
            Device::Generic(device) => device.handle_state(update),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LightState {
    pub switch: bool,
    pub dimmvalue: i64,
}

/// A switching actuator, optionally dimmable. Whether the device can dim
/// is fixed at creation.
#[derive(Debug)]
pub struct Light {
    device_id: u32,
    name: String,
    dimmable: bool,
    bridge: BridgeHandle,
    payload: Mutex<Value>,
    state: Subject<LightState>,
}

impl Light {
    pub(crate) fn new(bridge: BridgeHandle, device_id: u32, name: String, dimmable: bool) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            dimmable,
            bridge,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimmable(&self) -> bool {
        self.dimmable
    }

    pub fn state(&self) -> &Subject<LightState> {
        &self.state
    }

    fn interpret_dimmvalue(&self, switch: bool, merged: &Value) -> Result<i64, ModelError> {
        if !self.dimmable {
            return Ok(99);
        }
        if !switch {
            // Off keeps the last brightness so switching back on restores it.
            return Ok(self.state.last().map(|state| state.dimmvalue).unwrap_or(99));
        }
        // Reported values pass through as-is; only the command path clamps.
        payload::get_i64_lenient(merged, "dimmvalue").ok_or(ModelError::MissingField("dimmvalue"))
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };
        let switch = payload::get_bool(&merged, "switch").ok_or(ModelError::MissingField("switch"))?;
        let dimmvalue = self.interpret_dimmvalue(switch, &merged)?;
        self.state.publish(LightState { switch, dimmvalue });
        Ok(())
    }

    pub async fn switch(&self, on: bool) -> Result<(), CommandError> {
        self.bridge
            .switch_device(self.device_id, json!({ "switch": on }))
            .await
    }

    /// Slides the dimmer; out-of-range values are clamped to `[0, 99]`.
    pub async fn dim(&self, value: i64) -> Result<(), CommandError> {
        let value = value.clamp(0, 99);
        self.bridge
            .slide_device(self.device_id, json!({ "dimmvalue": value }))
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShadeState {
    pub current_state: Option<i64>,
    pub is_safety_enabled: Option<bool>,
    pub position: Option<i64>,
}

impl ShadeState {
    /// Defined only at the extremes: fully closed is 100, fully open 0.
    pub fn is_closed(&self) -> Option<bool> {
        match self.position {
            Some(100) => Some(true),
            Some(0) => Some(false),
            _ => None,
        }
    }
}

/// Motorized shade. State arrives in partial updates that are aggregated
/// field by field; all commands are suppressed while the wind/rain safety
/// lock is engaged.
#[derive(Debug)]
pub struct Shade {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    bridge: BridgeHandle,
    payload: Mutex<Value>,
    state: Subject<ShadeState>,
}

impl Shade {
    pub(crate) fn new(
        bridge: BridgeHandle,
        device_id: u32,
        name: String,
        comp_id: Option<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            bridge,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<ShadeState> {
        &self.state
    }

    /// Precise positioning needs a type-86 owning component and at least
    /// one reported `shPos`. Unknown while the component is unknown.
    pub fn supports_go_to(&self) -> Option<bool> {
        let comp_id = self.comp_id?;
        let comp_type = self.bridge.comp_type(comp_id)?;
        Some(comp_type == 86 && payload::has(&self.payload.lock(), "shPos"))
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
        }
        let mut next = self.state.last().unwrap_or_default();
        if let Some(current_state) = payload::get_i64_lenient(update, "curstate") {
            next.current_state = Some(current_state);
        }
        if let Some(safety) = payload::get_i64_lenient(update, "shSafety") {
            next.is_safety_enabled = Some(safety != 0);
        }
        if let Some(position) = payload::get_i64_lenient(update, "shPos") {
            next.position = Some(position);
        }
        self.state.publish(next);
        Ok(())
    }

    async fn send_state(
        &self,
        state: ShadeOperationState,
        value: Option<i64>,
    ) -> Result<(), CommandError> {
        let safety_engaged = self
            .state
            .last()
            .and_then(|state| state.is_safety_enabled)
            .unwrap_or(false);
        if safety_engaged {
            return Ok(());
        }
        let mut command = json!({ "deviceId": self.device_id, "state": state as u8 });
        if let Some(value) = value {
            command["value"] = value.into();
        }
        self.bridge
            .send_command(Opcode::SetDeviceShadingState, command)
            .await
    }

    pub async fn open(&self) -> Result<(), CommandError> {
        self.send_state(ShadeOperationState::Open, None).await
    }

    pub async fn close(&self) -> Result<(), CommandError> {
        self.send_state(ShadeOperationState::Close, None).await
    }

    pub async fn stop(&self) -> Result<(), CommandError> {
        self.send_state(ShadeOperationState::Stop, None).await
    }

    /// Moves to an absolute position. Dropped when positioning is
    /// unsupported or the target is outside `[0, 100]`.
    pub async fn move_to_position(&self, position: i64) -> Result<(), CommandError> {
        if self.supports_go_to() != Some(true) || !(0..=100).contains(&position) {
            return Ok(());
        }
        self.send_state(ShadeOperationState::GoTo, Some(position)).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaterState {
    pub payload: Value,
}

/// Heating actuator. Only the raw payload is propagated; the room model
/// carries the interpreted heating state.
#[derive(Debug)]
pub struct Heater {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    payload: Mutex<Value>,
    state: Subject<HeaterState>,
}

impl Heater {
    pub(crate) fn new(device_id: u32, name: String, comp_id: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<HeaterState> {
        &self.state
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };
        self.state.publish(HeaterState { payload: merged });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RcTouchState {
    pub temperature: f64,
    pub humidity: f64,
}

const INFO_TEXT_TEMPERATURE: &str = "1222";
const INFO_TEXT_HUMIDITY: &str = "1223";

/// Room-climate touch panel reporting temperature and humidity through
/// coded `info` entries.
#[derive(Debug)]
pub struct RcTouch {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    payload: Mutex<Value>,
    state: Subject<RcTouchState>,
}

impl RcTouch {
    pub(crate) fn new(device_id: u32, name: String, comp_id: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<RcTouchState> {
        &self.state
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };

        let mut temperature = None;
        let mut humidity = None;
        if let Some(entries) = payload::get(&merged, "info").and_then(Value::as_array) {
            for entry in entries {
                let Some(value) = payload::get(entry, "value").and_then(payload::as_f64_lenient)
                else {
                    continue;
                };
                match payload::get_str(entry, "text") {
                    Some(INFO_TEXT_TEMPERATURE) => temperature = Some(value),
                    Some(INFO_TEXT_HUMIDITY) => humidity = Some(value),
                    _ => {}
                }
            }
        }

        // Published only once both readings are present in the merged view.
        if let (Some(temperature), Some(humidity)) = (temperature, humidity) {
            self.state.publish(RcTouchState {
                temperature,
                humidity,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RockerState {
    pub new_state: bool,
    pub attributes: Value,
}

const ROCKER_ATTRIBUTE_KEYS: [&str; 11] = [
    "name",
    "icon",
    "order",
    "devType",
    "state",
    "curstate",
    "function",
    "delaytime",
    "dimmvalueOn",
    "dimmvalueOff",
    "dimmtime",
];

/// Pushbutton input. Reports on/off events and knows which devices it
/// controls via its `controlId` list.
#[derive(Debug)]
pub struct Rocker {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    bridge: BridgeHandle,
    payload: Mutex<Value>,
    is_on: Mutex<Option<bool>>,
    state: Subject<RockerState>,
}

impl Rocker {
    pub(crate) fn new(
        bridge: BridgeHandle,
        device_id: u32,
        name: String,
        comp_id: Option<u32>,
        initial: &Value,
    ) -> Arc<Self> {
        let is_on = payload::get_i64_lenient(initial, "curstate").map(|value| value != 0);
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            bridge,
            payload: Mutex::new(initial.clone()),
            is_on: Mutex::new(is_on),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<RockerState> {
        &self.state
    }

    pub fn is_on(&self) -> Option<bool> {
        *self.is_on.lock()
    }

    /// `"<name> (<controlled device names, sorted>)"`, resolved against
    /// the device registry.
    pub fn name_with_controlled(&self) -> String {
        let mut controlled: BTreeSet<String> = BTreeSet::new();
        if let Some(ids) = payload::get(&self.payload.lock(), "controlId").and_then(Value::as_array)
        {
            for id in ids {
                let Some(device_id) = id.as_u64().and_then(|id| u32::try_from(id).ok()) else {
                    continue;
                };
                if let Some(name) = self.bridge.device_name(device_id) {
                    controlled.insert(name);
                }
            }
        }
        let joined: Vec<String> = controlled.into_iter().collect();
        format!("{} ({})", self.name, joined.join(", "))
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };

        let mut is_on = self.is_on.lock();
        let current = payload::get_i64_lenient(&merged, "curstate")
            .map(|value| value != 0)
            .or(*is_on)
            .unwrap_or(false);
        *is_on = Some(current);
        drop(is_on);

        let new_state = payload::get_i64_lenient(&merged, "state").unwrap_or(0) != 0;

        let mut attributes = Map::new();
        for key in ROCKER_ATTRIBUTE_KEYS {
            attributes.insert(
                key.to_owned(),
                payload::get(&merged, key).cloned().unwrap_or(Value::Null),
            );
        }
        self.state.publish(RockerState {
            new_state,
            attributes: Value::Object(attributes),
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SwitchState {
    pub is_on: bool,
    pub timestamp: SystemTime,
    pub payload: Value,
}

/// Metered outlet that can be switched remotely.
#[derive(Debug)]
pub struct Switch {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    bridge: BridgeHandle,
    payload: Mutex<Value>,
    state: Subject<SwitchState>,
}

impl Switch {
    pub(crate) fn new(
        bridge: BridgeHandle,
        device_id: u32,
        name: String,
        comp_id: Option<u32>,
        initial: &Value,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            bridge,
            payload: Mutex::new(initial.clone()),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<SwitchState> {
        &self.state
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };
        let is_on = payload::get_bool(&merged, "switch")
            .or_else(|| self.state.last().map(|state| state.is_on))
            .unwrap_or(false);
        self.state.publish(SwitchState {
            is_on,
            timestamp: SystemTime::now(),
            payload: merged,
        });
        Ok(())
    }

    pub async fn switch(&self, on: bool) -> Result<(), CommandError> {
        self.bridge
            .switch_device(self.device_id, json!({ "switch": on }))
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoorWindowSensorState {
    pub is_closed: Option<bool>,
}

impl DoorWindowSensorState {
    pub fn is_open(&self) -> Option<bool> {
        self.is_closed.map(|closed| !closed)
    }
}

/// Magnetic contact on a door or window.
#[derive(Debug)]
pub struct DoorWindowSensor {
    device_id: u32,
    name: String,
    comp_id: Option<u32>,
    payload: Mutex<Value>,
    state: Subject<DoorWindowSensorState>,
}

impl DoorWindowSensor {
    pub(crate) fn new(device_id: u32, name: String, comp_id: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            comp_id,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comp_id(&self) -> Option<u32> {
        self.comp_id
    }

    pub fn state(&self) -> &Subject<DoorWindowSensorState> {
        &self.state
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
        }
        let mut next = self.state.last().unwrap_or(DoorWindowSensorState { is_closed: None });
        if let Some(current) = payload::get_i64_lenient(update, "curstate") {
            next.is_closed = Some(current == 1);
        }
        self.state.publish(next);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub payload: Value,
}

/// Fallback for device types without a dedicated behavior; the raw merged
/// payload is passed through untouched.
#[derive(Debug)]
pub struct GenericDevice {
    device_id: u32,
    name: String,
    payload: Mutex<Value>,
    state: Subject<DeviceState>,
}

impl GenericDevice {
    pub(crate) fn new(device_id: u32, name: String) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            name,
            payload: Mutex::new(Value::Null),
            state: Subject::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Subject<DeviceState> {
        &self.state
    }

    pub(crate) fn handle_state(&self, update: &Value) -> Result<(), ModelError> {
        let merged = {
            let mut retained = self.payload.lock();
            payload::merge_object(&mut retained, update);
            retained.clone()
        };
        self.state.publish(DeviceState { payload: merged });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle() -> BridgeHandle {
        BridgeHandle::detached()
    }

    #[test]
    fn light_publishes_switch_and_dimmvalue() {
        let light = Light::new(handle(), 7, "Lamp".into(), true);
        light
            .handle_state(&json!({"switch": true, "dimmvalue": 60}))
            .unwrap();
        assert_eq!(
            light.state().last(),
            Some(LightState {
                switch: true,
                dimmvalue: 60
            })
        );
    }

    #[test]
    fn light_off_retains_last_dimmvalue() {
        let light = Light::new(handle(), 7, "Lamp".into(), true);
        light
            .handle_state(&json!({"switch": true, "dimmvalue": 60}))
            .unwrap();
        light.handle_state(&json!({"switch": false})).unwrap();
        assert_eq!(
            light.state().last(),
            Some(LightState {
                switch: false,
                dimmvalue: 60
            })
        );
    }

    #[test]
    fn light_off_with_no_history_defaults_to_full() {
        let light = Light::new(handle(), 7, "Lamp".into(), true);
        light.handle_state(&json!({"switch": false})).unwrap();
        assert_eq!(light.state().last().unwrap().dimmvalue, 99);
    }

    #[test]
    fn light_reports_pass_through_unclamped() {
        let light = Light::new(handle(), 7, "Lamp".into(), true);
        light
            .handle_state(&json!({"switch": true, "dimmvalue": 130}))
            .unwrap();
        assert_eq!(light.state().last().unwrap().dimmvalue, 130);
    }

    #[test]
    fn non_dimmable_light_pins_dimmvalue() {
        let light = Light::new(handle(), 7, "Lamp".into(), false);
        light
            .handle_state(&json!({"switch": true, "dimmvalue": 10}))
            .unwrap();
        assert_eq!(light.state().last().unwrap().dimmvalue, 99);
    }

    #[test]
    fn light_without_switch_field_is_an_error() {
        let light = Light::new(handle(), 7, "Lamp".into(), true);
        assert!(matches!(
            light.handle_state(&json!({"dimmvalue": 10})),
            Err(ModelError::MissingField("switch"))
        ));
        assert!(light.state().last().is_none());
    }

    #[test]
    fn shade_aggregates_partials_field_by_field() {
        let shade = Shade::new(handle(), 9, "Blind".into(), Some(3));
        shade.handle_state(&json!({"curstate": 2})).unwrap();
        shade.handle_state(&json!({"shSafety": 1})).unwrap();
        shade.handle_state(&json!({"shPos": 40})).unwrap();
        let state = shade.state().last().unwrap();
        assert_eq!(state.current_state, Some(2));
        assert_eq!(state.is_safety_enabled, Some(true));
        assert_eq!(state.position, Some(40));
        assert_eq!(state.is_closed(), None);
    }

    #[test]
    fn shade_is_closed_only_at_extremes() {
        let state = ShadeState {
            position: Some(100),
            ..Default::default()
        };
        assert_eq!(state.is_closed(), Some(true));
        let state = ShadeState {
            position: Some(0),
            ..Default::default()
        };
        assert_eq!(state.is_closed(), Some(false));
        assert_eq!(ShadeState::default().is_closed(), None);
    }

    #[test]
    fn shade_keeps_out_of_range_positions_undefined() {
        let shade = Shade::new(handle(), 9, "Blind".into(), None);
        shade.handle_state(&json!({"shPos": 130})).unwrap();
        let state = shade.state().last().unwrap();
        assert_eq!(state.position, Some(130));
        assert_eq!(state.is_closed(), None);
    }

    #[test]
    fn shade_safety_clears_on_zero() {
        let shade = Shade::new(handle(), 9, "Blind".into(), None);
        shade.handle_state(&json!({"shSafety": 1})).unwrap();
        assert_eq!(shade.state().last().unwrap().is_safety_enabled, Some(true));
        shade.handle_state(&json!({"shSafety": 0})).unwrap();
        assert_eq!(shade.state().last().unwrap().is_safety_enabled, Some(false));
    }

    #[test]
    fn rctouch_waits_for_both_readings() {
        let sensor = RcTouch::new(12, "Panel".into(), Some(2));
        sensor
            .handle_state(&json!({"info": [{"text": "1222", "value": "21.5"}]}))
            .unwrap();
        assert!(sensor.state().last().is_none());
        sensor
            .handle_state(&json!({"info": [
                {"text": "1222", "value": 21.5},
                {"text": "1223", "value": 40},
            ]}))
            .unwrap();
        assert_eq!(
            sensor.state().last(),
            Some(RcTouchState {
                temperature: 21.5,
                humidity: 40.0
            })
        );
    }

    #[test]
    fn rocker_normalizes_mixed_state_encodings() {
        let rocker = Rocker::new(handle(), 4, "Button".into(), None, &json!({}));
        rocker.handle_state(&json!({"state": "1"})).unwrap();
        assert!(rocker.state().last().unwrap().new_state);
        rocker.handle_state(&json!({"state": 0})).unwrap();
        assert!(!rocker.state().last().unwrap().new_state);
        rocker.handle_state(&json!({"curstate": "1"})).unwrap();
        assert_eq!(rocker.is_on(), Some(true));
    }

    #[test]
    fn rocker_attributes_carry_known_keys() {
        let rocker = Rocker::new(handle(), 4, "Button".into(), None, &json!({}));
        rocker
            .handle_state(&json!({"state": 1, "devType": 220, "icon": "rocker"}))
            .unwrap();
        let state = rocker.state().last().unwrap();
        assert_eq!(state.attributes["devType"], json!(220));
        assert_eq!(state.attributes["icon"], json!("rocker"));
        assert_eq!(state.attributes["delaytime"], Value::Null);
    }

    #[test]
    fn switch_tracks_is_on_across_partials() {
        let switch = Switch::new(handle(), 5, "Outlet".into(), None, &json!({}));
        switch.handle_state(&json!({"switch": true})).unwrap();
        assert!(switch.state().last().unwrap().is_on);
        switch.handle_state(&json!({"power": 12.5})).unwrap();
        // switch key persists in the merged payload
        assert!(switch.state().last().unwrap().is_on);
    }

    #[test]
    fn door_window_sensor_maps_curstate() {
        let sensor = DoorWindowSensor::new(6, "Terrace".into(), None);
        sensor.handle_state(&json!({"curstate": 1})).unwrap();
        assert_eq!(sensor.state().last().unwrap().is_closed, Some(true));
        assert_eq!(sensor.state().last().unwrap().is_open(), Some(false));
        sensor.handle_state(&json!({"curstate": 0})).unwrap();
        assert_eq!(sensor.state().last().unwrap().is_closed, Some(false));
    }

    #[test]
    fn generic_device_passes_merged_payload_through() {
        let device = GenericDevice::new(99, "Mystery".into());
        device.handle_state(&json!({"a": 1})).unwrap();
        device.handle_state(&json!({"b": 2})).unwrap();
        assert_eq!(
            device.state().last().unwrap().payload,
            json!({"a": 1, "b": 2})
        );
    }
}
