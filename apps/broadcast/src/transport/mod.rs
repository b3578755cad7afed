use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;

pub mod mock;
pub mod websocket;

pub use mock::{MemoryChannel, MemoryPeer, memory_channel};
pub use websocket::WebSocketChannel;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("outbound write failed: {0}")]
    Write(String),
    #[error("transport channel closed")]
    ChannelClosed,
}

/// Cloneable handle onto the outbound queue. Every flow that wants to send
/// enqueues here; a single writer drains the queue onto the wire.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl OutboundSender {
    pub fn new(tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

/// Ordered, bidirectional text message channel to the signaling server.
#[async_trait]
pub trait MessageChannel: Send {
    fn sender(&self) -> OutboundSender;

    /// Next inbound text frame. `None` means the peer closed the channel
    /// cleanly; an error is a transport fault.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}
