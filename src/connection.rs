//! Encrypted full-duplex message channel.
//!
//! One `SecureConnection` wraps one framed byte stream for the lifetime of
//! a session. The pump couples a reader (open, decode, publish) with a
//! writer (drain queue, encode, seal) and terminates on peer close, fatal
//! error or explicit close. Outbound frames carry a monotonically
//! increasing counter; inbound frames must arrive with strictly increasing
//! counters or they are dropped as replays.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec;
use crate::crypto::{Direction, SessionKeys, TAG_LEN};
use crate::handshake::transport::{FrameDuplex, FrameSink, FrameSource};
use crate::messages::{Message, Opcode};
use crate::subject::Subject;

const SEND_QUEUE_DEPTH: usize = 32;
const COUNTER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("frame authentication failed")]
    AuthFailure,
    #[error("channel closed")]
    ChannelClosed,
    #[error("pump may only run once per connection")]
    PumpUnavailable,
}

struct PumpParts {
    transport: Box<dyn FrameDuplex>,
    outbound_rx: mpsc::Receiver<Message>,
}

struct ConnInner {
    keys: SessionKeys,
    session_id: Uuid,
    outbound_tx: mpsc::Sender<Message>,
    pump_parts: Mutex<Option<PumpParts>>,
    messages: Subject<Message>,
    cancel: CancellationToken,
}

/// Authenticated-encrypted message channel to the bridge.
#[derive(Clone)]
pub struct SecureConnection {
    inner: Arc<ConnInner>,
}

impl SecureConnection {
    pub fn new(keys: SessionKeys, session_id: Uuid, transport: Box<dyn FrameDuplex>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        Self {
            inner: Arc::new(ConnInner {
                keys,
                session_id,
                outbound_tx,
                pump_parts: Mutex::new(Some(PumpParts {
                    transport,
                    outbound_rx,
                })),
                messages: Subject::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Hot stream of successfully decoded inbound messages.
    pub fn messages(&self) -> &Subject<Message> {
        &self.inner.messages
    }

    /// Enqueues an outbound message. Completes once the writer has
    /// accepted the frame; per-sender order is preserved.
    pub async fn send(&self, opcode: Opcode, payload: Value) -> Result<(), ConnectionError> {
        if self.inner.cancel.is_cancelled() {
            return Err(ConnectionError::ChannelClosed);
        }
        tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(ConnectionError::ChannelClosed),
            sent = self.inner.outbound_tx.send(Message::new(opcode, payload)) => {
                sent.map_err(|_| ConnectionError::ChannelClosed)
            }
        }
    }

    /// Runs the channel until the peer closes, a fatal error occurs or
    /// [`close`](Self::close) is called. Expected disconnects return
    /// `Ok(())`.
    pub async fn pump(&self) -> Result<(), ConnectionError> {
        let parts = self
            .inner
            .pump_parts
            .lock()
            .take()
            .ok_or(ConnectionError::PumpUnavailable)?;
        let result = self.run_pump(parts).await;
        // The channel is unusable once the pump is gone.
        self.inner.cancel.cancel();
        result
    }

    /// Idempotent; makes the pump return promptly and fails later sends
    /// with `ChannelClosed`.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    async fn run_pump(&self, parts: PumpParts) -> Result<(), ConnectionError> {
        let (mut sink, mut source) = parts.transport.split();
        let mut outbound_rx = parts.outbound_rx;
        let aad = *self.inner.session_id.as_bytes();
        let mut send_counter: u64 = 0;
        let mut recv_counter: u64 = 0;

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => {
                    // Explicit close: flush what was already queued.
                    while let Ok(message) = outbound_rx.try_recv() {
                        if write_frame(sink.as_mut(), &self.inner.keys, &aad, &mut send_counter, &message)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    return Ok(());
                }
                inbound = source.recv() => match inbound {
                    Ok(Some(frame)) => self.accept_frame(&frame, &aad, &mut recv_counter)?,
                    Ok(None) => {
                        debug!(target: "xcomfort::connection", "peer closed the stream");
                        return Ok(());
                    }
                    Err(err) => return Err(ConnectionError::Transport(err.0)),
                },
                outbound = outbound_rx.recv() => match outbound {
                    Some(message) => {
                        write_frame(sink.as_mut(), &self.inner.keys, &aad, &mut send_counter, &message)
                            .await?;
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    fn accept_frame(
        &self,
        frame: &[u8],
        aad: &[u8],
        recv_counter: &mut u64,
    ) -> Result<(), ConnectionError> {
        if frame.len() < COUNTER_LEN + TAG_LEN {
            warn!(target: "xcomfort::connection", len = frame.len(), "dropping truncated frame");
            return Ok(());
        }
        let mut counter_bytes = [0u8; COUNTER_LEN];
        counter_bytes.copy_from_slice(&frame[..COUNTER_LEN]);
        let counter = u64::from_be_bytes(counter_bytes);
        if counter <= *recv_counter {
            warn!(
                target: "xcomfort::connection",
                counter,
                expected_above = *recv_counter,
                "dropping replayed frame"
            );
            return Ok(());
        }

        let plaintext = self
            .inner
            .keys
            .open(Direction::FromBridge, counter, aad, &frame[COUNTER_LEN..])
            .map_err(|_| ConnectionError::AuthFailure)?;
        *recv_counter = counter;

        match codec::decode(&plaintext) {
            Ok(message) => self.inner.messages.publish(message),
            Err(err) => {
                warn!(target: "xcomfort::connection", error = %err, "dropping undecodable frame");
            }
        }
        Ok(())
    }
}

async fn write_frame(
    sink: &mut dyn FrameSink,
    keys: &SessionKeys,
    aad: &[u8],
    counter: &mut u64,
    message: &Message,
) -> Result<(), ConnectionError> {
    let body = match codec::encode(message) {
        Ok(body) => body,
        Err(err) => {
            warn!(target: "xcomfort::connection", error = %err, "dropping unencodable message");
            return Ok(());
        }
    };
    *counter += 1;
    let sealed = keys
        .seal(Direction::ToBridge, *counter, aad, &body)
        .map_err(|err| ConnectionError::Transport(err.to_string()))?;

    let mut frame = Vec::with_capacity(COUNTER_LEN + sealed.len());
    frame.extend_from_slice(&counter.to_be_bytes());
    frame.extend_from_slice(&sealed);
    sink.send(frame).await.map_err(|err| ConnectionError::Transport(err.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::transport::memory_duplex;
    use serde_json::json;

    fn connection() -> (SecureConnection, Box<dyn FrameDuplex>) {
        let keys = SessionKeys::derive("authkey", b"salt", &Uuid::nil()).unwrap();
        let (client, server) = memory_duplex();
        (SecureConnection::new(keys, Uuid::nil(), client), server)
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (connection, _server) = connection();
        connection.close();
        assert!(matches!(
            connection.send(Opcode::Heartbeat, json!({})).await,
            Err(ConnectionError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn pump_runs_only_once() {
        let (connection, _server) = connection();
        connection.close();
        assert!(connection.pump().await.is_ok());
        assert!(matches!(
            connection.pump().await,
            Err(ConnectionError::PumpUnavailable)
        ));
    }

    #[tokio::test]
    async fn pump_ends_cleanly_on_peer_close() {
        let (connection, server) = connection();
        drop(server);
        assert!(connection.pump().await.is_ok());
    }
}
