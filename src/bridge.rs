//! Bridge supervisor, dispatch and entity registries.
//!
//! The `Bridge` owns the lifecycle: it bootstraps a secure connection,
//! feeds the decoded message stream through the dispatch table, and keeps
//! reconnecting with a fixed backoff until it is closed. All registry
//! mutation and observer notification happens on the supervisor task, so
//! handlers never race each other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionError, SecureConnection};
use crate::devices::{
    Device, DoorWindowSensor, GenericDevice, Heater, Light, ModelError, RcTouch, Rocker, Shade,
    Switch,
};
use crate::handshake::{
    setup_secure_connection, HandshakeError, HttpTransport, ReqwestHttp, StreamConnector,
    TcpConnector,
};
use crate::messages::{payload, Message, Opcode};
use crate::room::Room;
use crate::subject::Subject;

const LOG_TARGET: &str = "xcomfort::bridge";

/// Knobs for the supervisor and its transports.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pause between reconnect attempts.
    pub backoff: Duration,
    /// Bound on each bootstrap and stream I/O step.
    pub transport_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            transport_timeout: Duration::from_secs(10),
        }
    }
}

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Initializing,
    Ready,
    Closing,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("run may only be called while the bridge is uninitialized")]
    AlreadyRunning,
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Why a typed command was not delivered.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bridge connection is not ready")]
    NotReady,
    #[error("channel closed")]
    ChannelClosed,
    #[error("no state has been received for this entity yet")]
    NoKnownState,
}

#[derive(Debug, Clone)]
pub struct CompState {
    pub raw: Value,
}

/// A logical component on the bridge (usually a physical module). Devices
/// reference their owning component by id; the raw state is propagated
/// without interpretation.
#[derive(Debug)]
pub struct Comp {
    comp_id: u32,
    comp_type: i64,
    name: String,
    state: Subject<CompState>,
}

impl Comp {
    fn new(comp_id: u32, comp_type: i64, name: String) -> Arc<Self> {
        Arc::new(Self {
            comp_id,
            comp_type,
            name,
            state: Subject::new(),
        })
    }

    pub fn comp_id(&self) -> u32 {
        self.comp_id
    }

    pub fn comp_type(&self) -> i64 {
        self.comp_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Subject<CompState> {
        &self.state
    }

    fn handle_state(&self, raw: &Value) {
        self.state.publish(CompState { raw: raw.clone() });
    }
}

/// Entity-side handle back to the bridge core. Entities hold it weakly so
/// the registries and the devices they contain do not keep each other
/// alive.
#[derive(Debug, Clone)]
pub(crate) struct BridgeHandle {
    core: Weak<BridgeCore>,
}

impl BridgeHandle {
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { core: Weak::new() }
    }

    pub(crate) async fn send_command(
        &self,
        opcode: Opcode,
        command: Value,
    ) -> Result<(), CommandError> {
        let core = self.core.upgrade().ok_or(CommandError::ChannelClosed)?;
        core.send_message(opcode, command).await
    }

    pub(crate) async fn switch_device(
        &self,
        device_id: u32,
        command: Value,
    ) -> Result<(), CommandError> {
        self.send_command(Opcode::ActionSwitchDevice, device_command(device_id, &command))
            .await
    }

    pub(crate) async fn slide_device(
        &self,
        device_id: u32,
        command: Value,
    ) -> Result<(), CommandError> {
        self.send_command(Opcode::ActionSlideDevice, device_command(device_id, &command))
            .await
    }

    pub(crate) fn comp_type(&self, comp_id: u32) -> Option<i64> {
        let core = self.core.upgrade()?;
        let comp_type = core.comps.lock().get(&comp_id).map(|comp| comp.comp_type());
        comp_type
    }

    pub(crate) fn device_name(&self, device_id: u32) -> Option<String> {
        let core = self.core.upgrade()?;
        let name = core.devices.lock().get(&device_id).map(Device::name);
        name
    }
}

fn device_command(device_id: u32, extra: &Value) -> Value {
    let mut command = json!({ "deviceId": device_id });
    payload::merge_object(&mut command, extra);
    command
}

pub(crate) struct BridgeCore {
    ip_address: String,
    authkey: String,
    config: BridgeConfig,
    http: Arc<dyn HttpTransport>,
    connector: Arc<dyn StreamConnector>,
    handle: BridgeHandle,
    state: Mutex<BridgeState>,
    devices: Mutex<HashMap<u32, Device>>,
    rooms: Mutex<HashMap<u32, Arc<Room>>>,
    comps: Mutex<HashMap<u32, Arc<Comp>>>,
    connection: Mutex<Option<SecureConnection>>,
    initialized: watch::Sender<bool>,
    closing: Mutex<CancellationToken>,
}

impl BridgeCore {
    pub(crate) async fn send_message(
        &self,
        opcode: Opcode,
        command: Value,
    ) -> Result<(), CommandError> {
        if *self.state.lock() != BridgeState::Ready {
            return Err(CommandError::NotReady);
        }
        let connection = self.connection.lock().clone().ok_or(CommandError::NotReady)?;
        connection
            .send(opcode, command)
            .await
            .map_err(|_| CommandError::ChannelClosed)
    }

    fn dispatch(&self, message: Message) {
        match message.opcode {
            Opcode::SetAllData => self.handle_set_all_data(&message.payload),
            Opcode::SetDeviceState => self.handle_set_device_state(&message.payload),
            Opcode::SetStateInfo => self.handle_set_state_info(&message.payload),
            other => debug!(
                target: LOG_TARGET,
                opcode = other.name(),
                raw = other.as_u16(),
                "unhandled message"
            ),
        }
    }

    fn handle_set_all_data(&self, data: &Value) {
        if payload::has(data, "lastItem") {
            self.mark_ready();
        }
        self.apply_batch(data, "devices", |item| self.upsert_device(item));
        self.apply_batch(data, "comps", |item| self.upsert_comp(item));
        self.apply_batch(data, "rooms", |item| self.upsert_room(item));
        self.apply_batch(data, "roomHeating", |item| self.upsert_room(item));
    }

    /// One malformed element never aborts the rest of a batch.
    fn apply_batch(
        &self,
        data: &Value,
        key: &'static str,
        mut apply: impl FnMut(&Value) -> Result<(), ModelError>,
    ) {
        let Some(items) = payload::get(data, key).and_then(Value::as_array) else {
            return;
        };
        for item in items {
            if let Err(err) = apply(item) {
                warn!(target: LOG_TARGET, key, error = %err, "skipping malformed element");
            }
        }
    }

    fn handle_set_device_state(&self, update: &Value) {
        let Some(device_id) = payload::get_u32(update, "deviceId") else {
            debug!(target: LOG_TARGET, "device state without deviceId");
            return;
        };
        // Updates for devices that were never announced are dropped.
        let Some(device) = self.devices.lock().get(&device_id).cloned() else {
            return;
        };
        if let Err(err) = device.handle_state(update) {
            warn!(target: LOG_TARGET, device_id, error = %err, "device state rejected");
        }
    }

    fn handle_set_state_info(&self, update: &Value) {
        let Some(items) = payload::get(update, "item").and_then(Value::as_array) else {
            debug!(target: LOG_TARGET, "state info without item array");
            return;
        };
        for item in items {
            if let Some(device_id) = payload::get_u32(item, "deviceId") {
                let device = self.devices.lock().get(&device_id).cloned();
                if let Some(device) = device {
                    if let Err(err) = device.handle_state(item) {
                        warn!(target: LOG_TARGET, device_id, error = %err, "device state rejected");
                    }
                }
            } else if let Some(room_id) = payload::get_u32(item, "roomId") {
                let room = self.rooms.lock().get(&room_id).cloned();
                if let Some(room) = room {
                    if let Err(err) = room.handle_state(item) {
                        warn!(target: LOG_TARGET, room_id, error = %err, "room state rejected");
                    }
                }
            } else if let Some(comp_id) = payload::get_u32(item, "compId") {
                let comp = self.comps.lock().get(&comp_id).cloned();
                if let Some(comp) = comp {
                    comp.handle_state(item);
                }
            } else {
                debug!(target: LOG_TARGET, "state info element without a known id");
            }
        }
    }

    fn upsert_device(&self, item: &Value) -> Result<(), ModelError> {
        let device_id =
            payload::get_u32(item, "deviceId").ok_or(ModelError::MissingField("deviceId"))?;
        let device = {
            let mut devices = self.devices.lock();
            match devices.get(&device_id) {
                Some(existing) => existing.clone(),
                None => {
                    let created = self.classify_device(device_id, item)?;
                    devices.insert(device_id, created.clone());
                    created
                }
            }
        };
        device.handle_state(item)
    }

    fn classify_device(&self, device_id: u32, item: &Value) -> Result<Device, ModelError> {
        let name = payload::get_str(item, "name")
            .ok_or(ModelError::MissingField("name"))?
            .to_owned();
        let dev_type =
            payload::get_i64_lenient(item, "devType").ok_or(ModelError::MissingField("devType"))?;
        let comp_id = payload::get_u32(item, "compId");
        let handle = self.handle.clone();

        let device = match dev_type {
            100 => {
                if payload::get_bool(item, "monitorPower").unwrap_or(false) {
                    Device::Switch(Switch::new(handle, device_id, name, comp_id, item))
                } else if payload::get_i64_lenient(item, "usage").unwrap_or(0) == 1 {
                    Device::Rocker(Rocker::new(handle, device_id, name, comp_id, item))
                } else {
                    let dimmable = payload::get_bool(item, "dimmable").unwrap_or(false);
                    Device::Light(Light::new(handle, device_id, name, dimmable))
                }
            }
            101 => {
                let dimmable = payload::get_bool(item, "dimmable").unwrap_or(false);
                Device::Light(Light::new(handle, device_id, name, dimmable))
            }
            102 => Device::Shade(Shade::new(handle, device_id, name, comp_id)),
            210 => Device::DoorWindowSensor(DoorWindowSensor::new(device_id, name, comp_id)),
            220 => Device::Rocker(Rocker::new(handle, device_id, name, comp_id, item)),
            440 => Device::Heater(Heater::new(device_id, name, comp_id)),
            450 => Device::RcTouch(RcTouch::new(device_id, name, comp_id)),
            _ => Device::Generic(GenericDevice::new(device_id, name)),
        };
        debug!(
            target: LOG_TARGET,
            device_id,
            dev_type,
            variant = variant_name(&device),
            "device classified"
        );
        Ok(device)
    }

    fn upsert_room(&self, item: &Value) -> Result<(), ModelError> {
        let room_id = payload::get_u32(item, "roomId").ok_or(ModelError::MissingField("roomId"))?;
        let room = {
            let mut rooms = self.rooms.lock();
            match rooms.get(&room_id) {
                Some(existing) => existing.clone(),
                None => {
                    let name = payload::get_str(item, "name")
                        .ok_or(ModelError::MissingField("name"))?
                        .to_owned();
                    let created = Room::new(self.handle.clone(), room_id, name);
                    rooms.insert(room_id, created.clone());
                    created
                }
            }
        };
        room.handle_state(item)
    }

    fn upsert_comp(&self, item: &Value) -> Result<(), ModelError> {
        let comp_id = payload::get_u32(item, "compId").ok_or(ModelError::MissingField("compId"))?;
        let comp = {
            let mut comps = self.comps.lock();
            match comps.get(&comp_id) {
                Some(existing) => existing.clone(),
                None => {
                    let name = payload::get_str(item, "name")
                        .ok_or(ModelError::MissingField("name"))?
                        .to_owned();
                    let comp_type = payload::get_i64_lenient(item, "compType")
                        .ok_or(ModelError::MissingField("compType"))?;
                    let created = Comp::new(comp_id, comp_type, name);
                    comps.insert(comp_id, created.clone());
                    created
                }
            }
        };
        comp.handle_state(item);
        Ok(())
    }

    fn mark_ready(&self) {
        {
            let mut state = self.state.lock();
            if *state == BridgeState::Initializing {
                *state = BridgeState::Ready;
                info!(target: LOG_TARGET, "bridge initialized");
            }
        }
        self.initialized.send_replace(true);
    }
}

fn variant_name(device: &Device) -> &'static str {
    match device {
        Device::Light(_) => "light",
        Device::Shade(_) => "shade",
        Device::Heater(_) => "heater",
        Device::RcTouch(_) => "rctouch",
        Device::Rocker(_) => "rocker",
        Device::Switch(_) => "switch",
        Device::DoorWindowSensor(_) => "door_window_sensor",
        Device::Generic(_) => "generic",
    }
}

/// Client for one Eaton xComfort Bridge.
pub struct Bridge {
    core: Arc<BridgeCore>,
}

impl Bridge {
    /// Builds a bridge client with the default HTTP client and TCP stream
    /// connector. The HTTP client is owned and dies with the bridge.
    pub fn new(ip_address: impl Into<String>, authkey: impl Into<String>) -> Self {
        Self::with_config(ip_address, authkey, BridgeConfig::default())
    }

    pub fn with_config(
        ip_address: impl Into<String>,
        authkey: impl Into<String>,
        config: BridgeConfig,
    ) -> Self {
        let http = Arc::new(ReqwestHttp::new(config.transport_timeout));
        Self::with_transports(ip_address, authkey, config, http, Arc::new(TcpConnector))
    }

    /// Builds a bridge client around injected transports. The transports
    /// are borrowed and never torn down by the bridge.
    pub fn with_transports(
        ip_address: impl Into<String>,
        authkey: impl Into<String>,
        config: BridgeConfig,
        http: Arc<dyn HttpTransport>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let (initialized, _) = watch::channel(false);
        let core = Arc::new_cyclic(|weak: &Weak<BridgeCore>| BridgeCore {
            ip_address: ip_address.into(),
            authkey: authkey.into(),
            config,
            http,
            connector,
            handle: BridgeHandle { core: weak.clone() },
            state: Mutex::new(BridgeState::Uninitialized),
            devices: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            comps: Mutex::new(HashMap::new()),
            connection: Mutex::new(None),
            initialized,
            closing: Mutex::new(CancellationToken::new()),
        });
        Self { core }
    }

    pub fn state(&self) -> BridgeState {
        *self.core.state.lock()
    }

    /// Runs the supervisor loop: bootstrap, pump, dispatch, and reconnect
    /// with backoff until [`close`](Self::close) is called.
    pub async fn run(&self) -> Result<(), BridgeError> {
        {
            let mut state = self.core.state.lock();
            if *state != BridgeState::Uninitialized {
                return Err(BridgeError::AlreadyRunning);
            }
            *state = BridgeState::Initializing;
        }
        *self.core.closing.lock() = CancellationToken::new();

        loop {
            if *self.core.state.lock() == BridgeState::Closing {
                break;
            }
            match self.session_once().await {
                Ok(()) => info!(target: LOG_TARGET, "bridge connection closed"),
                Err(err) => warn!(target: LOG_TARGET, error = %err, "bridge session ended"),
            }
            self.core.connection.lock().take();
            if *self.core.state.lock() == BridgeState::Closing {
                break;
            }
            let closing = self.core.closing.lock().clone();
            tokio::select! {
                _ = tokio::time::sleep(self.core.config.backoff) => {}
                _ = closing.cancelled() => {}
            }
        }

        self.core.connection.lock().take();
        *self.core.state.lock() = BridgeState::Uninitialized;
        Ok(())
    }

    async fn session_once(&self) -> Result<(), BridgeError> {
        let core = &self.core;
        let connection = setup_secure_connection(
            core.http.as_ref(),
            core.connector.as_ref(),
            &core.ip_address,
            &core.authkey,
            core.config.transport_timeout,
        )
        .await?;

        let mut inbound = connection.messages().subscribe();
        *core.connection.lock() = Some(connection.clone());
        if core.closing.lock().is_cancelled() {
            connection.close();
        }
        info!(
            target: LOG_TARGET,
            session_id = %connection.session_id(),
            "secure channel established"
        );

        let pump = connection.pump();
        tokio::pin!(pump);
        let result = loop {
            tokio::select! {
                result = &mut pump => break result,
                Some(message) = inbound.recv() => core.dispatch(message),
            }
        };
        // Deliver anything published while the pump was winding down.
        while let Ok(message) = inbound.try_recv() {
            core.dispatch(message);
        }
        result.map_err(BridgeError::from)
    }

    /// Stops the supervisor: cancels the pump, drops the connection and
    /// wakes a pending backoff sleep.
    pub async fn close(&self) {
        *self.core.state.lock() = BridgeState::Closing;
        self.core.closing.lock().cancel();
        if let Some(connection) = self.core.connection.lock().clone() {
            connection.close();
        }
    }

    /// Resolves once a `SET_ALL_DATA` carrying `lastItem` has been
    /// processed. Stays resolved across reconnects.
    pub async fn wait_for_initialization(&self) {
        let mut initialized = self.core.initialized.subscribe();
        if *initialized.borrow() {
            return;
        }
        while initialized.changed().await.is_ok() {
            if *initialized.borrow() {
                return;
            }
        }
    }

    pub async fn get_devices(&self) -> HashMap<u32, Device> {
        self.wait_for_initialization().await;
        self.core.devices.lock().clone()
    }

    pub async fn get_rooms(&self) -> HashMap<u32, Arc<Room>> {
        self.wait_for_initialization().await;
        self.core.rooms.lock().clone()
    }

    pub async fn get_comps(&self) -> HashMap<u32, Arc<Comp>> {
        self.wait_for_initialization().await;
        self.core.comps.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<BridgeCore> {
        &self.core
    }
}
