//! WebSocket signaling endpoint
//!
//! Every text frame carries one `{"event": ..., "data": ...}` message. The
//! same endpoint type serves outgoing connections and sockets accepted by
//! [`super::RecordingServer`].

use crate::signaling::channel::SignalingChannel;
use crate::signaling::protocol::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// Signaling channel over a WebSocket connection
pub struct WebSocketSignalingClient {
    /// URL or remote address, for logs
    peer: String,

    /// Outgoing frames, drained by the sender task
    tx: mpsc::UnboundedSender<Message>,

    closed: AtomicBool,
}

impl WebSocketSignalingClient {
    /// Connect to a signaling server.
    ///
    /// Returns the channel and the stream of parsed inbound messages. The
    /// stream ends when the socket closes.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalingMessage>)> {
        info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling server");
        Ok(Self::attach(ws_stream, url))
    }

    /// Wrap an already established WebSocket
    pub fn attach<S>(
        ws_stream: WebSocketStream<S>,
        peer: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingMessage>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = peer.into();
        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx, peer.clone()));
        tokio::spawn(Self::receiver_task(read, inbound_tx, tx.clone(), peer.clone()));

        (
            Self {
                peer,
                tx,
                closed: AtomicBool::new(false),
            },
            inbound_rx,
        )
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Sender task: sends frames from the channel to the socket
    async fn sender_task<S>(
        mut write: SplitSink<WebSocketStream<S>, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
        peer: String,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message to {}: {}", peer, e);
                break;
            }
            if is_close {
                break;
            }
        }

        debug!("Sender task for {} terminated", peer);
    }

    /// Receiver task: parses text frames into signaling messages
    async fn receiver_task<S>(
        mut read: SplitStream<WebSocketStream<S>>,
        inbound: mpsc::UnboundedSender<SignalingMessage>,
        outgoing: mpsc::UnboundedSender<Message>,
        peer: String,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Received signaling frame from {}: {}", peer, text);
                    match SignalingMessage::from_json(&text) {
                        Ok(message) => {
                            if inbound.send(message).is_err() {
                                debug!("Session for {} is gone, dropping frame", peer);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping unparsable frame from {}: {}", peer, e),
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = outgoing.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed by {}", peer);
                    break;
                }
                Err(e) => {
                    error!("WebSocket error from {}: {}", peer, e);
                    break;
                }
                _ => {}
            }
        }

        debug!("Receiver task for {} terminated", peer);
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignalingClient {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SignalingError(format!(
                "channel to {} is closed",
                self.peer
            )));
        }
        let json = message.to_json()?;
        debug!("Sending {} to {}", message.message_type(), self.peer);
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::WebSocketError(format!("connection to {} is gone", self.peer)))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The sender task may already be gone if the socket dropped first
        let _ = self.tx.send(Message::Close(None));
        Ok(())
    }
}
