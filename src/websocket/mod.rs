//! WebSocket connection layer: transport abstraction, the per-connection
//! state machine and route dispatch.

mod connection;
mod dispatcher;
mod error;
mod events;
mod handler;
pub mod memory;
mod registry;
mod state;
mod transport;

pub use connection::{Connection, ConnectionOptions, DEFAULT_MAX_MESSAGE_SIZE};
pub use dispatcher::StreamDispatcher;
pub use error::{close_code, ConnectionError, TransportError};
pub use handler::stream_upgrade_handler;
pub use registry::{HandlerFuture, HandlerRegistry, StreamHandler, StreamRoute};
pub use state::ConnectionState;
pub use transport::{
    CloseFrame, InboundFrame, MessageKind, OutboundFrame, Transport, TransportSink,
    TransportStream, WsTransport,
};
