//! Client library for the Eaton xComfort Bridge.
//!
//! Maintains a long-lived, authenticated, encrypted control channel to the
//! bridge over the local network, translates its evented wire protocol
//! into an in-memory model of devices, rooms and components, and exposes
//! typed commands that are serialized back onto the channel. Frames are
//! CBOR-encoded and sealed with ChaCha20-Poly1305 under a session key
//! derived via HKDF from the bridge authkey.

pub mod bridge;
pub mod codec;
pub mod connection;
pub mod crypto;
pub mod devices;
pub mod handshake;
pub mod messages;
pub mod room;
pub mod subject;

pub use bridge::{
    Bridge, BridgeConfig, BridgeError, BridgeState, CommandError, Comp, CompState,
};
pub use connection::{ConnectionError, SecureConnection};
pub use crypto::{CryptoError, SessionKeys};
pub use devices::{
    Device, DeviceState, DoorWindowSensor, DoorWindowSensorState, GenericDevice, Heater,
    HeaterState, Light, LightState, ModelError, RcTouch, RcTouchState, Rocker, RockerState, Shade,
    ShadeState, Switch, SwitchState,
};
pub use handshake::{
    HandshakeError, HttpTransport, ReqwestHttp, StreamConnector, TcpConnector,
};
pub use messages::{Message, Opcode, ShadeOperationState};
pub use room::{RctMode, RctState, Room, RoomState, SetpointRange};
pub use subject::Subject;
