#![allow(dead_code)]

//! Shared harness: a scripted bootstrap endpoint, a connector handing out
//! pre-wired in-memory streams, and an emulated bridge peer speaking the
//! encrypted frame protocol from the other end.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use xcomfort::bridge::{Bridge, BridgeConfig, BridgeError};
use xcomfort::codec;
use xcomfort::crypto::{Direction, SessionKeys};
use xcomfort::handshake::{
    memory_duplex, FrameDuplex, FrameSink, FrameSource, HttpError, HttpTransport, StreamConnector,
    TransportError,
};
use xcomfort::messages::{Message, Opcode};

pub const AUTHKEY: &str = "secret-authkey";
pub const SALT: [u8; 4] = [0xa1, 0xb2, 0xc3, 0xd4];
pub const SESSION_ID: &str = "6f611b01-3a88-45b0-90e7-2b71da13bf3f";
pub const STREAM_PORT: u16 = 8769;

pub fn session_id() -> Uuid {
    Uuid::parse_str(SESSION_ID).unwrap()
}

pub fn session_keys() -> SessionKeys {
    SessionKeys::derive(AUTHKEY, &SALT, &session_id()).unwrap()
}

pub fn bootstrap_reply() -> Value {
    json!({
        "sessionId": SESSION_ID,
        "salt": "a1b2c3d4",
        "streamPort": STREAM_PORT,
    })
}

/// Bootstrap endpoint answering from a scripted reply queue.
pub struct ScriptedHttp {
    replies: Mutex<VecDeque<Result<Value, HttpError>>>,
    calls: Mutex<u32>,
}

impl ScriptedHttp {
    pub fn new(replies: Vec<Result<Value, HttpError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
        })
    }

    pub fn accepting(sessions: usize) -> Arc<Self> {
        Self::new((0..sessions).map(|_| Ok(bootstrap_reply())).collect())
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn post_json(&self, _url: &str, _body: &Value) -> Result<Value, HttpError> {
        *self.calls.lock() += 1;
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(HttpError::Transport("bootstrap script exhausted".into())))
    }
}

/// Connector handing out pre-wired stream halves, one per session.
pub struct QueueConnector {
    duplexes: Mutex<VecDeque<Box<dyn FrameDuplex>>>,
}

impl QueueConnector {
    pub fn new(duplexes: VecDeque<Box<dyn FrameDuplex>>) -> Arc<Self> {
        Arc::new(Self {
            duplexes: Mutex::new(duplexes),
        })
    }
}

#[async_trait]
impl StreamConnector for QueueConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
    ) -> Result<Box<dyn FrameDuplex>, TransportError> {
        self.duplexes
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError("no scripted stream left".into()))
    }
}

/// The bridge's side of one encrypted session.
pub struct BridgePeer {
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
    keys: SessionKeys,
    aad: [u8; 16],
    send_counter: u64,
}

impl BridgePeer {
    pub fn new(duplex: Box<dyn FrameDuplex>) -> Self {
        let (sink, source) = duplex.split();
        Self {
            sink,
            source,
            keys: session_keys(),
            aad: *session_id().as_bytes(),
            send_counter: 0,
        }
    }

    pub fn seal(&self, counter: u64, message: &Message) -> Vec<u8> {
        self.seal_bytes(counter, &codec::encode(message).unwrap())
    }

    /// Seals an arbitrary frame body, valid CBOR or not.
    pub fn seal_bytes(&self, counter: u64, body: &[u8]) -> Vec<u8> {
        let sealed = self
            .keys
            .seal(Direction::FromBridge, counter, &self.aad, body)
            .unwrap();
        let mut frame = counter.to_be_bytes().to_vec();
        frame.extend_from_slice(&sealed);
        frame
    }

    pub async fn send(&mut self, opcode: Opcode, payload: Value) {
        self.send_counter += 1;
        let frame = self.seal(self.send_counter, &Message::new(opcode, payload));
        self.sink.send(frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, frame: Vec<u8>) {
        self.sink.send(frame).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<Message> {
        let frame = self.source.recv().await.unwrap()?;
        let mut counter_bytes = [0u8; 8];
        counter_bytes.copy_from_slice(&frame[..8]);
        let counter = u64::from_be_bytes(counter_bytes);
        let plaintext = self
            .keys
            .open(Direction::ToBridge, counter, &self.aad, &frame[8..])
            .unwrap();
        Some(codec::decode(&plaintext).unwrap())
    }
}

pub struct Harness {
    pub bridge: Arc<Bridge>,
    pub peers: Vec<BridgePeer>,
    pub http: Arc<ScriptedHttp>,
    pub run: JoinHandle<Result<(), BridgeError>>,
}

/// Starts a supervised bridge scripted for `sessions` consecutive
/// connections, returning the matching peers in connect order.
pub fn start_bridge(sessions: usize, config: BridgeConfig) -> Harness {
    let mut client_halves = VecDeque::new();
    let mut peers = Vec::new();
    for _ in 0..sessions {
        let (client, server) = memory_duplex();
        client_halves.push_back(client);
        peers.push(BridgePeer::new(server));
    }

    let http = ScriptedHttp::accepting(sessions);
    let connector = QueueConnector::new(client_halves);
    let bridge = Arc::new(Bridge::with_transports(
        "192.168.1.2",
        AUTHKEY,
        config,
        http.clone(),
        connector,
    ));
    let run = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.run().await }
    });

    Harness {
        bridge,
        peers,
        http,
        run,
    }
}

pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        backoff: std::time::Duration::from_millis(20),
        transport_timeout: std::time::Duration::from_secs(2),
    }
}
