//! In-memory transport.
//!
//! [`pair`] returns a transport to hand to a [`Connection`](super::Connection)
//! and the [`MemoryPeer`] that plays the remote client. Dropping the peer ends
//! the inbound stream; dropping the transport ends the peer's outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::error::TransportError;
use super::transport::{
    CloseFrame, InboundFrame, MessageKind, OutboundFrame, Transport, TransportSink,
    TransportStream,
};

type Inbound = Result<InboundFrame, TransportError>;

pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let fail_sends = Arc::new(AtomicBool::new(false));

    let transport = MemoryTransport {
        inbound: inbound_rx,
        outbound: outbound_tx,
        fail_sends: fail_sends.clone(),
    };
    let peer = MemoryPeer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        fail_sends,
    };
    (transport, peer)
}

pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    fail_sends: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    fn split(self) -> (Box<dyn TransportSink>, Box<dyn TransportStream>) {
        (
            Box::new(MemorySink {
                outbound: self.outbound,
                fail_sends: self.fail_sends,
            }),
            Box::new(MemoryStream {
                inbound: self.inbound,
            }),
        )
    }
}

struct MemorySink {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("peer unreachable".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }
}

/// The remote end of an in-memory transport.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    fail_sends: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Queue a frame for the connection; false once the connection side is gone.
    pub fn send_frame(&self, frame: InboundFrame) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(InboundFrame::text(text))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send_frame(InboundFrame::binary(data))
    }

    /// Send `parts` as one fragmented message.
    pub fn send_fragmented(&self, kind: MessageKind, parts: &[&[u8]]) -> bool {
        let last = parts.len().saturating_sub(1);
        parts.iter().enumerate().all(|(i, part)| {
            let payload = Bytes::copy_from_slice(part);
            let fin = i == last;
            let frame = if i == 0 {
                InboundFrame::Start { kind, payload, fin }
            } else {
                InboundFrame::Continue { payload, fin }
            };
            self.send_frame(frame)
        })
    }

    pub fn send_close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.send_frame(InboundFrame::Close(Some(CloseFrame::new(code, reason))))
    }

    /// Make the connection's next receive fail with `error`.
    pub fn inject_error(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Make every following send from the connection fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Next frame sent by the connection, `None` once its sink is released
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Next frame if it is text, `None` for any other frame or once the
    /// connection is gone.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            OutboundFrame::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut peer) = pair();
        let (mut sink, mut stream) = transport.split();

        assert!(peer.send_text("hi"));
        assert_eq!(stream.recv().await, Some(Ok(InboundFrame::text("hi"))));

        sink.send(OutboundFrame::Text("yo".into())).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("yo"));
    }

    #[tokio::test]
    async fn test_dropping_peer_ends_stream() {
        let (transport, peer) = pair();
        let (mut sink, mut stream) = transport.split();
        drop(peer);

        assert!(stream.recv().await.is_none());
        assert_eq!(
            sink.send(OutboundFrame::Text("x".into())).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_fail_sends() {
        let (transport, peer) = pair();
        let (mut sink, _stream) = transport.split();
        peer.fail_sends();

        assert!(matches!(
            sink.send(OutboundFrame::Binary(Bytes::from_static(b"x"))).await,
            Err(TransportError::Send(_))
        ));
    }
}
