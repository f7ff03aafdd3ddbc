//! Transport abstraction underneath [`Connection`](super::Connection).
//!
//! A transport is split once into an outbound sink and an inbound stream so
//! that a pending receive never blocks a send. Production connections run on
//! axum's WebSocket via [`WsTransport`]; tests use the in-memory pair in
//! [`memory`](super::memory).

use async_trait::async_trait;
use axum::extract::ws::{self, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Frame produced by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// First fragment of a message; `fin` marks it as the last one too
    Start {
        kind: MessageKind,
        payload: Bytes,
        fin: bool,
    },
    /// Continuation of the message started by the last `Start`
    Continue { payload: Bytes, fin: bool },
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

impl InboundFrame {
    pub fn text(text: impl Into<String>) -> Self {
        InboundFrame::Start {
            kind: MessageKind::Text,
            payload: Bytes::from(text.into()),
            fin: true,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        InboundFrame::Start {
            kind: MessageKind::Binary,
            payload: data.into(),
            fin: true,
        }
    }
}

/// Frame sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
    Close(CloseFrame),
}

#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;
}

#[async_trait]
pub trait TransportStream: Send {
    /// Next frame from the peer, `None` once the stream has ended without a
    /// close frame.
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// A bidirectional transport that can be split into its two halves.
pub trait Transport: Send + 'static {
    fn split(self) -> (Box<dyn TransportSink>, Box<dyn TransportStream>);
}

/// Transport over an upgraded axum WebSocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WsTransport {
    fn split(self) -> (Box<dyn TransportSink>, Box<dyn TransportStream>) {
        let (sink, stream) = self.socket.split();
        (Box::new(WsSink { sink }), Box::new(WsStream { stream }))
    }
}

struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        let message = match frame {
            OutboundFrame::Text(text) => Message::Text(text.into()),
            OutboundFrame::Binary(data) => Message::Binary(data),
            OutboundFrame::Close(close) => Message::Close(Some(ws::CloseFrame {
                code: close.code,
                reason: close.reason.into(),
            })),
        };

        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WsStream {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportStream for WsStream {
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        // axum reassembles fragmented messages, so every data frame is final
        let frame = match self.stream.next().await? {
            Ok(Message::Text(text)) => InboundFrame::Start {
                kind: MessageKind::Text,
                payload: Bytes::copy_from_slice(text.as_str().as_bytes()),
                fin: true,
            },
            Ok(Message::Binary(data)) => InboundFrame::binary(data),
            Ok(Message::Ping(data)) => InboundFrame::Ping(data),
            Ok(Message::Pong(data)) => InboundFrame::Pong(data),
            Ok(Message::Close(close)) => InboundFrame::Close(
                close.map(|c| CloseFrame::new(c.code, c.reason.as_str().to_string())),
            ),
            Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
        };
        Some(Ok(frame))
    }
}
