use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{MessageChannel, OutboundSender, TransportError};
use crate::protocol::ClientMessage;

/// In-process channel with the server side exposed as a [`MemoryPeer`].
pub struct MemoryChannel {
    outbound: OutboundSender,
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
}

pub fn memory_channel() -> (MemoryChannel, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            outbound: OutboundSender::new(out_tx),
            inbound: in_rx,
        },
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

impl MemoryPeer {
    pub fn push(&self, text: impl Into<String>) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(text.into()));
        }
    }

    pub fn fault(&self, err: TransportError) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(err));
        }
    }

    /// Ends the inbound stream once already queued frames are consumed.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    pub async fn next_outbound(&mut self) -> Option<ClientMessage> {
        self.outbound.recv().await
    }

    pub fn try_outbound(&mut self) -> Option<ClientMessage> {
        self.outbound.try_recv().ok()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await
    }
}
