//! Transport seams for the bootstrap exchange and the encrypted stream.
//!
//! The HTTP request/response primitive and the bidirectional byte stream
//! are external collaborators: both sit behind traits so tests and
//! embedders can slot in their own plumbing. The defaults are a `reqwest`
//! client and a length-delimited TCP stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest frame the stream codec will accept.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Failure of the byte-stream transport.
#[derive(Debug, Error)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

/// Failure of the HTTP bootstrap primitive.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
}

/// Async request/response facility used only during bootstrap.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError>;
}

/// Default HTTP transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Borrows an application-owned client instead of building one.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttp {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| HttpError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|err| HttpError::Transport(err.to_string()))
    }
}

/// Writing half of a framed byte stream.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;
}

/// Reading half of a framed byte stream. `Ok(None)` is an orderly close.
#[async_trait]
pub trait FrameSource: Send {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// A full-duplex framed byte stream, splittable into its two halves.
pub trait FrameDuplex: Send {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>);
}

/// Opens the stream endpoint announced by the bootstrap reply.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn FrameDuplex>, TransportError>;
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

struct TcpFrameSink {
    write: FramedWrite<tokio::net::tcp::OwnedWriteHalf, LengthDelimitedCodec>,
}

struct TcpFrameSource {
    read: FramedRead<tokio::net::tcp::OwnedReadHalf, LengthDelimitedCodec>,
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.write
            .send(Bytes::from(frame))
            .await
            .map_err(|err| TransportError(err.to_string()))
    }
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.read.next().await {
            Some(Ok(frame)) => Ok(Some(frame.to_vec())),
            Some(Err(err)) => Err(TransportError(err.to_string())),
            None => Ok(None),
        }
    }
}

/// Length-delimited frames over TCP.
pub struct TcpFrameDuplex {
    stream: TcpStream,
}

impl FrameDuplex for TcpFrameDuplex {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(TcpFrameSink {
                write: FramedWrite::new(write_half, frame_codec()),
            }),
            Box::new(TcpFrameSource {
                read: FramedRead::new(read_half, frame_codec()),
            }),
        )
    }
}

/// Default connector dialing `host:port` over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

#[async_trait]
impl StreamConnector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn FrameDuplex>, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|err| TransportError(err.to_string()))?;
        Ok(Box::new(TcpFrameDuplex { stream }))
    }
}

/// In-memory duplex useful for unit tests and examples. Returns the two
/// peers of one conversation; dropping either half closes the direction.
pub fn memory_duplex() -> (Box<dyn FrameDuplex>, Box<dyn FrameDuplex>) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
    (
        Box::new(MemoryFrameDuplex {
            outgoing: a_to_b_tx,
            incoming: b_to_a_rx,
        }),
        Box::new(MemoryFrameDuplex {
            outgoing: b_to_a_tx,
            incoming: a_to_b_rx,
        }),
    )
}

struct MemoryFrameDuplex {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

struct MemoryFrameSink {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

struct MemoryFrameSource {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FrameDuplex for MemoryFrameDuplex {
    fn split(self: Box<Self>) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        (
            Box::new(MemoryFrameSink {
                outgoing: self.outgoing,
            }),
            Box::new(MemoryFrameSource {
                incoming: self.incoming,
            }),
        )
    }
}

#[async_trait]
impl FrameSink for MemoryFrameSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError("peer closed".into()))
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.incoming.recv().await)
    }
}
