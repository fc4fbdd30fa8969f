//! HTTP-driven session bootstrap.
//!
//! One authenticated POST against the bridge yields the session id, the
//! KDF salt and the port of the encrypted stream endpoint. The stream is
//! then dialed and a configured [`SecureConnection`] handed back. Every
//! network step is bounded by the transport timeout.

use std::time::Duration;

use rand::RngCore;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::connection::SecureConnection;
use crate::crypto::{auth_proof, SessionKeys};
use crate::messages::payload;

pub mod transport;

pub use transport::{
    memory_duplex, FrameDuplex, FrameSink, FrameSource, HttpError, HttpTransport, ReqwestHttp,
    StreamConnector, TcpConnector, TransportError,
};

/// Why a session could not be established.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("bridge rejected the authkey")]
    AuthRejected,
    #[error("malformed bootstrap reply: {0}")]
    MalformedBootstrap(String),
}

impl From<HttpError> for HandshakeError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Status(401) | HttpError::Status(403) => HandshakeError::AuthRejected,
            HttpError::Status(status) => HandshakeError::Transport(format!("http status {status}")),
            HttpError::Transport(detail) => HandshakeError::Transport(detail),
        }
    }
}

impl From<TransportError> for HandshakeError {
    fn from(err: TransportError) -> Self {
        HandshakeError::Transport(err.0)
    }
}

/// Session parameters announced by the bridge's bootstrap endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReply {
    pub session_id: Uuid,
    pub salt: Vec<u8>,
    pub stream_port: u16,
}

pub(crate) fn parse_bootstrap_reply(reply: &Value) -> Result<BootstrapReply, HandshakeError> {
    let session_id = payload::get_str(reply, "sessionId")
        .ok_or_else(|| HandshakeError::MalformedBootstrap("missing sessionId".into()))?;
    let session_id = Uuid::parse_str(session_id)
        .map_err(|_| HandshakeError::MalformedBootstrap("sessionId is not a uuid".into()))?;

    let salt_hex = payload::get_str(reply, "salt")
        .ok_or_else(|| HandshakeError::MalformedBootstrap("missing salt".into()))?;
    let salt = from_hex(salt_hex)
        .ok_or_else(|| HandshakeError::MalformedBootstrap("salt is not hex".into()))?;

    let stream_port = payload::get_u32(reply, "streamPort")
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port != 0)
        .ok_or_else(|| HandshakeError::MalformedBootstrap("missing streamPort".into()))?;

    Ok(BootstrapReply {
        session_id,
        salt,
        stream_port,
    })
}

/// Runs the bootstrap exchange and returns an encrypted connection bound
/// to the freshly derived session key.
pub async fn setup_secure_connection(
    http: &dyn HttpTransport,
    connector: &dyn StreamConnector,
    ip_address: &str,
    authkey: &str,
    timeout: Duration,
) -> Result<SecureConnection, HandshakeError> {
    let mut client_nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut client_nonce);

    let url = format!("http://{ip_address}/bridge/connect");
    let body = json!({
        "nonce": to_hex(&client_nonce),
        "auth": auth_proof(authkey, &client_nonce),
    });

    let reply = bounded(timeout, "bootstrap request", http.post_json(&url, &body)).await??;
    let bootstrap = parse_bootstrap_reply(&reply)?;
    debug!(
        target: "xcomfort::handshake",
        session_id = %bootstrap.session_id,
        stream_port = bootstrap.stream_port,
        "bootstrap accepted"
    );

    let keys = SessionKeys::derive(authkey, &bootstrap.salt, &bootstrap.session_id)
        .map_err(|err| HandshakeError::Transport(err.to_string()))?;

    let duplex = bounded(
        timeout,
        "stream connect",
        connector.connect(ip_address, bootstrap.stream_port),
    )
    .await??;

    Ok(SecureConnection::new(keys, bootstrap.session_id, duplex))
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    future: impl std::future::Future<Output = T>,
) -> Result<T, HandshakeError> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| HandshakeError::Transport(format!("{what} timed out")))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_reply() {
        let reply = json!({
            "sessionId": "6f611b01-3a88-45b0-90e7-2b71da13bf3f",
            "salt": "00ff10",
            "streamPort": 8769,
        });
        let parsed = parse_bootstrap_reply(&reply).unwrap();
        assert_eq!(parsed.salt, vec![0x00, 0xff, 0x10]);
        assert_eq!(parsed.stream_port, 8769);
    }

    #[test]
    fn rejects_missing_or_invalid_fields() {
        let missing_salt = json!({
            "sessionId": "6f611b01-3a88-45b0-90e7-2b71da13bf3f",
            "streamPort": 8769,
        });
        assert!(matches!(
            parse_bootstrap_reply(&missing_salt),
            Err(HandshakeError::MalformedBootstrap(_))
        ));

        let bad_uuid = json!({"sessionId": "nope", "salt": "00", "streamPort": 1});
        assert!(matches!(
            parse_bootstrap_reply(&bad_uuid),
            Err(HandshakeError::MalformedBootstrap(_))
        ));

        let bad_port = json!({
            "sessionId": "6f611b01-3a88-45b0-90e7-2b71da13bf3f",
            "salt": "00",
            "streamPort": 0,
        });
        assert!(parse_bootstrap_reply(&bad_port).is_err());
    }

    #[test]
    fn auth_status_maps_to_rejection() {
        assert!(matches!(
            HandshakeError::from(HttpError::Status(401)),
            HandshakeError::AuthRejected
        ));
        assert!(matches!(
            HandshakeError::from(HttpError::Status(500)),
            HandshakeError::Transport(_)
        ));
    }

    #[test]
    fn hex_round_trip() {
        assert_eq!(from_hex(&to_hex(&[0, 1, 0xab, 0xff])).unwrap(), vec![0, 1, 0xab, 0xff]);
        assert!(from_hex("abc").is_none());
        assert!(from_hex("zz").is_none());
    }
}
