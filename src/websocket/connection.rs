//! A single WebSocket connection and its state machine.
//!
//! A connection is single-flight: one send or receive at a time, guarded by
//! the `Communicating` state. `close` and `dispose` may run while a receive is
//! pending and interrupt it through a watch channel.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::metrics::WsMessageMetrics;
use crate::routing::RouteParameters;

use super::error::{close_code, ConnectionError, TransportError};
use super::events::EventHub;
use super::state::ConnectionState;
use super::transport::{
    CloseFrame, InboundFrame, OutboundFrame, Transport, TransportSink, TransportStream,
};

/// Largest reassembled message accepted by default (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub remote_addr: Option<SocketAddr>,
    pub max_message_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

pub struct Connection {
    id: Uuid,
    state: Mutex<ConnectionState>,
    sink: AsyncMutex<Option<Box<dyn TransportSink>>>,
    stream: AsyncMutex<Option<Box<dyn TransportStream>>>,
    /// Flips to true when the connection starts closing
    close_signal: watch::Sender<bool>,
    params: RouteParameters,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    max_message_size: usize,
    events: EventHub,
}

enum ReadOutcome {
    Message(Bytes),
    PeerClosed(Option<CloseFrame>),
    Ended,
    Failed(TransportError),
    TooLarge(usize),
    Interrupted,
}

impl Connection {
    /// Wrap `transport` in a connection that is still `Connecting`.
    ///
    /// Observers registered before [`open`](Self::open) see the connected
    /// event.
    pub fn pending<T: Transport>(
        transport: T,
        params: RouteParameters,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let (sink, stream) = transport.split();
        let (close_signal, _) = watch::channel(false);

        Arc::new(Self {
            id: Uuid::new_v4(),
            state: Mutex::new(ConnectionState::Connecting),
            sink: AsyncMutex::new(Some(sink)),
            stream: AsyncMutex::new(Some(stream)),
            close_signal,
            params,
            remote_addr: options.remote_addr,
            connected_at: Utc::now(),
            max_message_size: options.max_message_size,
            events: EventHub::default(),
        })
    }

    /// Wrap an already upgraded transport; the connection starts `Connected`.
    pub fn accept<T: Transport>(
        transport: T,
        params: RouteParameters,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let connection = Self::pending(transport, params, options);
        if connection.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            connection.events.connected(connection.id);
        }
        connection
    }

    /// Finish the handshake: `Connecting -> Connected`.
    pub fn open(&self) -> Result<(), ConnectionError> {
        if !self.transition(ConnectionState::Connecting, ConnectionState::Connected) {
            return Err(ConnectionError::InvalidOperation {
                operation: "open",
                state: self.state(),
            });
        }

        tracing::debug!(connection_id = %self.id, "Connection opened");
        self.events.connected(self.id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn is_error(&self) -> bool {
        self.state() == ConnectionState::Error
    }

    pub fn params(&self) -> &RouteParameters {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn on_connected<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.on_connected(Arc::new(f));
    }

    pub fn on_text_received<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.on_text(Arc::new(f));
    }

    pub fn on_binary_received<F>(&self, f: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.events.on_binary(Arc::new(f));
    }

    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.events.on_error(Arc::new(f));
    }

    /// Observe the close code once the connection reaches `Closed` through a
    /// close handshake.
    pub fn on_closed<F>(&self, f: F)
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        self.events.on_closed(Arc::new(f));
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.send_frame(OutboundFrame::Text(text.into()), "send_text")
            .await?;
        WsMessageMetrics::record_text_sent();
        Ok(())
    }

    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
        self.send_frame(OutboundFrame::Binary(data.into()), "send_binary")
            .await?;
        WsMessageMetrics::record_binary_sent();
        Ok(())
    }

    /// Serialize `value` and send it as one text message.
    pub async fn send_json<T>(&self, value: &T) -> Result<(), ConnectionError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    async fn send_frame(
        &self,
        frame: OutboundFrame,
        operation: &'static str,
    ) -> Result<(), ConnectionError> {
        self.begin(operation)?;

        let result = {
            let mut sink = self.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send(frame).await,
                None => Err(TransportError::Closed),
            }
        };

        match result {
            Ok(()) => {
                self.transition(ConnectionState::Communicating, ConnectionState::Idle);
                Ok(())
            }
            Err(e) => Err(self.fail(operation, e).await),
        }
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Read one complete message and decode it as UTF-8.
    pub async fn receive_text(&self) -> Result<String, ConnectionError> {
        let payload = self.receive("receive_text").await?;
        let text = String::from_utf8(payload.to_vec())
            .map_err(|e| ConnectionError::InvalidPayload(e.to_string()))?;

        WsMessageMetrics::record_text_received();
        self.events.text(self.id, &text);
        Ok(text)
    }

    /// Read one complete message as raw bytes.
    pub async fn receive_binary(&self) -> Result<Bytes, ConnectionError> {
        let payload = self.receive("receive_binary").await?;

        WsMessageMetrics::record_binary_received();
        self.events.binary(self.id, &payload);
        Ok(payload)
    }

    async fn receive(&self, operation: &'static str) -> Result<Bytes, ConnectionError> {
        self.begin(operation)?;
        let mut closing = self.close_signal.subscribe();

        let outcome = {
            let mut stream = self.stream.lock().await;
            match stream.as_mut() {
                Some(stream) => {
                    tokio::select! {
                        biased;
                        _ = closing.wait_for(|closing| *closing) => ReadOutcome::Interrupted,
                        outcome = read_message(&mut **stream, self.max_message_size) => outcome,
                    }
                }
                None => ReadOutcome::Failed(TransportError::Closed),
            }
        };

        match outcome {
            ReadOutcome::Message(payload) => {
                if !self.transition(ConnectionState::Communicating, ConnectionState::Idle) {
                    return Err(ConnectionError::closed(None, "connection closed during receive"));
                }
                Ok(payload)
            }
            ReadOutcome::PeerClosed(frame) => Err(self.peer_closed(frame).await),
            ReadOutcome::Ended => Err(self.fail(operation, TransportError::Closed).await),
            ReadOutcome::Failed(e) => Err(self.fail(operation, e).await),
            ReadOutcome::TooLarge(size) => {
                if self.transition(ConnectionState::Communicating, ConnectionState::Closing) {
                    tracing::warn!(
                        connection_id = %self.id,
                        size = size,
                        limit = self.max_message_size,
                        "Inbound message too large, closing connection"
                    );
                    self.finish_close(close_code::MESSAGE_TOO_BIG, "message too big")
                        .await;
                }
                Err(ConnectionError::MessageTooLarge {
                    size,
                    limit: self.max_message_size,
                })
            }
            ReadOutcome::Interrupted => {
                Err(ConnectionError::closed(None, "connection closed locally"))
            }
        }
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Close with a handshake. Interrupts a pending receive, sends the close
    /// frame and fires the closed event with `code`.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        {
            let mut state = self.lock_state();
            if matches!(
                *state,
                ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Error
            ) {
                return Err(ConnectionError::InvalidOperation {
                    operation: "close",
                    state: *state,
                });
            }
            *state = ConnectionState::Closing;
        }

        self.finish_close(code, reason).await;
        Ok(())
    }

    /// Release the transport without a close handshake. No closed event.
    pub async fn dispose(&self) {
        let previous = {
            let mut state = self.lock_state();
            let previous = *state;
            if !previous.is_terminal() {
                *state = ConnectionState::Closed;
            }
            previous
        };

        self.close_signal.send_replace(true);
        self.release().await;

        if !previous.is_terminal() {
            tracing::debug!(connection_id = %self.id, state = %previous, "Connection disposed");
        }
    }

    /// Send the close frame and move `Closing -> Closed`.
    async fn finish_close(&self, code: u16, reason: &str) {
        self.close_signal.send_replace(true);

        {
            let mut sink = self.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                let frame = OutboundFrame::Close(CloseFrame::new(code, reason));
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(
                        connection_id = %self.id,
                        error = %e,
                        "Failed to send close frame"
                    );
                }
            }
        }

        self.release().await;

        if self.transition(ConnectionState::Closing, ConnectionState::Closed) {
            tracing::debug!(connection_id = %self.id, code = code, reason = %reason, "Connection closed");
            self.events.closed(self.id, code);
        }
    }

    async fn peer_closed(&self, frame: Option<CloseFrame>) -> ConnectionError {
        let (code, reason) = frame
            .map(|f| (f.code, f.reason))
            .unwrap_or((close_code::NO_STATUS, String::new()));

        if self.transition(ConnectionState::Communicating, ConnectionState::Closed) {
            self.close_signal.send_replace(true);
            self.release().await;
            tracing::debug!(connection_id = %self.id, code = code, reason = %reason, "Peer closed connection");
            self.events.closed(self.id, code);
        }

        ConnectionError::closed(Some(code), reason)
    }

    /// Move an in-flight operation to `Error` after a transport failure.
    async fn fail(&self, operation: &'static str, error: TransportError) -> ConnectionError {
        if self.transition(ConnectionState::Communicating, ConnectionState::Error) {
            tracing::warn!(
                connection_id = %self.id,
                operation = operation,
                error = %error,
                "Transport failure"
            );
            self.close_signal.send_replace(true);
            self.release().await;
            self.events.error(self.id, &error);
        }

        ConnectionError::closed(None, format!("{} failed: {}", operation, error))
    }

    async fn release(&self) {
        self.sink.lock().await.take();
        self.stream.lock().await.take();
    }

    // ------------------------------------------------------------------
    // State helpers
    // ------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, operation: &'static str) -> Result<(), ConnectionError> {
        let mut state = self.lock_state();
        if !state.accepts_operations() {
            return Err(ConnectionError::InvalidOperation {
                operation,
                state: *state,
            });
        }
        *state = ConnectionState::Communicating;
        Ok(())
    }

    /// Compare-and-set on the state; false when the state was not `from`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.lock_state();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("params", &self.params)
            .field("remote_addr", &self.remote_addr)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Reassemble fragments into one message, skipping control frames.
async fn read_message(stream: &mut dyn TransportStream, limit: usize) -> ReadOutcome {
    let mut buffer = BytesMut::new();
    let mut started = false;

    loop {
        let frame = match stream.recv().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return ReadOutcome::Failed(e),
            None => return ReadOutcome::Ended,
        };

        let (payload, fin) = match frame {
            InboundFrame::Ping(_) | InboundFrame::Pong(_) => continue,
            InboundFrame::Close(close) => return ReadOutcome::PeerClosed(close),
            InboundFrame::Start { payload, fin, .. } => {
                if started {
                    return ReadOutcome::Failed(TransportError::Protocol(
                        "new message started before the previous one finished".to_string(),
                    ));
                }
                started = true;
                (payload, fin)
            }
            InboundFrame::Continue { payload, fin } => {
                if !started {
                    return ReadOutcome::Failed(TransportError::Protocol(
                        "continuation frame without a message".to_string(),
                    ));
                }
                (payload, fin)
            }
        };

        let size = buffer.len() + payload.len();
        if size > limit {
            return ReadOutcome::TooLarge(size);
        }
        buffer.extend_from_slice(&payload);

        if fin {
            return ReadOutcome::Message(buffer.freeze());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::memory::{self, MemoryPeer};
    use crate::websocket::transport::MessageKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connect() -> (Arc<Connection>, MemoryPeer) {
        let (transport, peer) = memory::pair();
        let conn = Connection::accept(transport, RouteParameters::new(), ConnectionOptions::default());
        (conn, peer)
    }

    #[tokio::test]
    async fn test_accept_starts_connected() {
        let (conn, _peer) = connect();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_pending_fires_connected_on_open() {
        let (transport, _peer) = memory::pair();
        let conn = Connection::pending(transport, RouteParameters::new(), ConnectionOptions::default());
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        conn.on_connected(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(
            conn.send_text("early").await,
            Err(ConnectionError::InvalidOperation { .. })
        ));

        conn.open().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(conn.open().is_err());
    }

    #[tokio::test]
    async fn test_send_moves_to_idle() {
        let (conn, mut peer) = connect();

        conn.send_text("hello").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));

        conn.send_binary(Bytes::from_static(b"\x01\x02")).await.unwrap();
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Binary(Bytes::from_static(b"\x01\x02")))
        );
    }

    #[tokio::test]
    async fn test_send_json() {
        let (conn, mut peer) = connect();

        conn.send_json(&serde_json::json!({"type": "hello", "n": 1}))
            .await
            .unwrap();

        let text = peer.recv_text().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "hello");
    }

    #[tokio::test]
    async fn test_send_failure_moves_to_error() {
        let (conn, peer) = connect();
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        conn.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        peer.fail_sends();
        let err = conn.send_text("lost").await.unwrap_err();

        assert!(matches!(err, ConnectionError::ConnectionClosed { .. }));
        assert!(conn.is_error());
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // Terminal: further operations are rejected
        assert!(matches!(
            conn.send_text("again").await,
            Err(ConnectionError::InvalidOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_text_fires_observer() {
        let (conn, peer) = connect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        conn.on_text_received(move |t| sink.lock().unwrap().push(t.to_string()));

        peer.send_text("ping?");
        assert_eq!(conn.receive_text().await.unwrap(), "ping?");
        assert_eq!(conn.state(), ConnectionState::Idle);
        assert_eq!(*seen.lock().unwrap(), vec!["ping?".to_string()]);
    }

    #[tokio::test]
    async fn test_receive_reassembles_fragments_and_skips_control_frames() {
        let (conn, peer) = connect();

        peer.send_frame(InboundFrame::Ping(Bytes::new()));
        peer.send_fragmented(MessageKind::Binary, &[b"ab", b"cd", b"ef"]);

        assert_eq!(
            conn.receive_binary().await.unwrap(),
            Bytes::from_static(b"abcdef")
        );
    }

    #[tokio::test]
    async fn test_receive_invalid_utf8() {
        let (conn, peer) = connect();
        peer.send_binary(vec![0xff, 0xfe]);

        assert!(matches!(
            conn.receive_text().await,
            Err(ConnectionError::InvalidPayload(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_peer_close_during_receive() {
        let (conn, peer) = connect();
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = codes.clone();
        conn.on_closed(move |code| sink.lock().unwrap().push(code));

        peer.send_close(1000, "bye");
        let err = conn.receive_text().await.unwrap_err();

        assert!(matches!(
            err,
            ConnectionError::ConnectionClosed { code: Some(1000), .. }
        ));
        assert!(conn.is_closed());
        assert_eq!(*codes.lock().unwrap(), vec![1000]);
    }

    #[tokio::test]
    async fn test_peer_close_without_status_reports_1005() {
        let (conn, peer) = connect();
        peer.send_frame(InboundFrame::Close(None));

        assert!(matches!(
            conn.receive_binary().await,
            Err(ConnectionError::ConnectionClosed { code: Some(1005), .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_end_moves_to_error() {
        let (conn, peer) = connect();
        drop(peer);

        assert!(matches!(
            conn.receive_text().await,
            Err(ConnectionError::ConnectionClosed { .. })
        ));
        assert!(conn.is_error());
    }

    #[tokio::test]
    async fn test_injected_receive_error_moves_to_error() {
        let (conn, peer) = connect();
        peer.inject_error(TransportError::Receive("reset by peer".into()));

        assert!(conn.receive_text().await.is_err());
        assert!(conn.is_error());
    }

    #[tokio::test]
    async fn test_oversized_message_closes_with_1009() {
        let (transport, mut peer) = memory::pair();
        let conn = Connection::accept(
            transport,
            RouteParameters::new(),
            ConnectionOptions {
                max_message_size: 4,
                ..Default::default()
            },
        );

        peer.send_fragmented(MessageKind::Text, &[b"abc", b"def"]);
        assert!(matches!(
            conn.receive_text().await,
            Err(ConnectionError::MessageTooLarge { size: 6, limit: 4 })
        ));
        assert!(conn.is_closed());
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1009, "message too big")))
        );
    }

    #[tokio::test]
    async fn test_second_operation_while_communicating_is_rejected() {
        let (conn, _peer) = connect();

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.receive_text().await })
        };
        while conn.state() != ConnectionState::Communicating {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            conn.send_text("busy").await,
            Err(ConnectionError::InvalidOperation {
                state: ConnectionState::Communicating,
                ..
            })
        ));

        conn.close(1000, "done").await.unwrap();
        assert!(reader.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_receive() {
        let (conn, mut peer) = connect();
        let closed_codes = Arc::new(Mutex::new(Vec::new()));
        let sink = closed_codes.clone();
        conn.on_closed(move |code| sink.lock().unwrap().push(code));

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.receive_text().await })
        };
        while conn.state() != ConnectionState::Communicating {
            tokio::task::yield_now().await;
        }

        conn.close(4000, "server says bye").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("receive was not interrupted")
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::ConnectionClosed { .. })));
        assert!(conn.is_closed());
        assert_eq!(*closed_codes.lock().unwrap(), vec![4000]);
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(4000, "server says bye")))
        );
        // Sink released after the close frame
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_from_idle_fires_closed_once() {
        let (conn, mut peer) = connect();
        let closed_codes = Arc::new(Mutex::new(Vec::new()));
        let sink = closed_codes.clone();
        conn.on_closed(move |code| sink.lock().unwrap().push(code));

        conn.send_text("hello").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Idle);

        conn.close(1000, "bye").await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(*closed_codes.lock().unwrap(), vec![1000]);
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));
        assert_eq!(
            peer.recv().await,
            Some(OutboundFrame::Close(CloseFrame::new(1000, "bye")))
        );
    }

    #[tokio::test]
    async fn test_close_twice_is_rejected() {
        let (conn, _peer) = connect();
        conn.close(1000, "").await.unwrap();

        assert!(matches!(
            conn.close(1000, "").await,
            Err(ConnectionError::InvalidOperation { operation: "close", .. })
        ));
    }

    #[tokio::test]
    async fn test_close_completes_when_close_frame_fails() {
        let (conn, peer) = connect();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        conn.on_closed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        peer.fail_sends();
        conn.close(1001, "going away").await.unwrap();

        assert!(conn.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_releases_without_event() {
        let (conn, mut peer) = connect();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        conn.on_closed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        conn.dispose().await;

        assert!(conn.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_panicking_observer_is_isolated() {
        let (conn, peer) = connect();
        conn.on_text_received(|_| panic!("bad observer"));

        peer.send_text("still delivered");
        assert_eq!(conn.receive_text().await.unwrap(), "still delivered");
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn test_params_are_exposed() {
        let (transport, _peer) = memory::pair();
        let params: RouteParameters = [("groupId".to_string(), "7".to_string())]
            .into_iter()
            .collect();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let conn = Connection::accept(
            transport,
            params,
            ConnectionOptions {
                remote_addr: Some(addr),
                ..Default::default()
            },
        );

        assert_eq!(conn.param("groupId"), Some("7"));
        assert_eq!(conn.param("missing"), None);
        assert_eq!(conn.remote_addr(), Some(addr));
    }
}
