use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::{MessageChannel, OutboundSender, TransportError};
use crate::protocol::ClientMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketChannel {
    outbound: OutboundSender,
    reader: SplitStream<WsStream>,
    faults: mpsc::UnboundedReceiver<TransportError>,
    writer: tokio::task::JoinHandle<()>,
}

impl WebSocketChannel {
    pub async fn connect(url: &Url) -> Result<Self, TransportError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::info!(target = "transport", url = %url, "signaling websocket connected");
        let (ws_write, reader) = ws_stream.split();

        let (send_tx, send_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (fault_tx, faults) = mpsc::unbounded_channel::<TransportError>();
        let writer = tokio::spawn(write_loop(ws_write, send_rx, fault_tx));

        Ok(Self {
            outbound: OutboundSender::new(send_tx),
            reader,
            faults,
            writer,
        })
    }
}

async fn write_loop(
    mut ws_write: SplitSink<WsStream, Message>,
    mut send_rx: mpsc::UnboundedReceiver<ClientMessage>,
    faults: mpsc::UnboundedSender<TransportError>,
) {
    while let Some(message) = send_rx.recv().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(target = "transport", error = %err, "dropping unencodable message");
                continue;
            }
        };
        tracing::trace!(
            target = "transport",
            event = "ws_out",
            method = message.method().as_str(),
            len = text.len()
        );
        if let Err(err) = ws_write.send(Message::Text(text)).await {
            let _ = faults.send(TransportError::Write(err.to_string()));
            return;
        }
    }
    let _ = ws_write.close().await;
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

#[async_trait]
impl MessageChannel for WebSocketChannel {
    fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            tokio::select! {
                biased;
                Some(fault) = self.faults.recv() => return Some(Err(fault)),
                frame = self.reader.next() => match frame {
                    None => return None,
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!(target = "transport", event = "ws_in", kind = "text", len = text.len());
                        return Some(Ok(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::debug!(target = "transport", event = "ws_in", kind = "binary", len = data.len());
                        match String::from_utf8(data) {
                            Ok(text) => return Some(Ok(text)),
                            Err(_) => {
                                tracing::warn!(target = "transport", "dropping non-utf8 binary frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(target = "transport", ?frame, "signaling websocket closed by peer");
                        return None;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return None,
                    Some(Err(err @ WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake))) => {
                        tracing::debug!(target = "transport", "signaling websocket reset: {err}");
                        return Some(Err(err.into()));
                    }
                    Some(Err(err)) => {
                        tracing::warn!(target = "transport", "signaling websocket error: {err}");
                        return Some(Err(err.into()));
                    }
                },
            }
        }
    }
}
