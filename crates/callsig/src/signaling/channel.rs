//! Signaling channel abstraction and an in-process implementation

use super::protocol::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Sending half of a bidirectional signaling channel.
///
/// Inbound messages are delivered separately as an
/// `mpsc::UnboundedReceiver<SignalingMessage>` handed to the session.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Disconnect; later sends fail
    async fn close(&self) -> Result<()>;
}

/// One end of an in-process channel pair
pub struct LocalSignalingChannel {
    name: String,
    /// Dropped on close so the other end's inbound stream ends
    tx: Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>,
}

impl LocalSignalingChannel {
    fn new(name: &str, tx: mpsc::UnboundedSender<SignalingMessage>) -> Self {
        Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
        }
    }
}

#[async_trait]
impl SignalingChannel for LocalSignalingChannel {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let tx = self.tx.lock().await;
        let Some(tx) = tx.as_ref() else {
            return Err(Error::SignalingError(format!("{} is closed", self.name)));
        };
        debug!("{} -> {}", self.name, message.message_type());
        tx.send(message)
            .map_err(|_| Error::SignalingError(format!("{}: remote end dropped", self.name)))
    }

    async fn close(&self) -> Result<()> {
        if self.tx.lock().await.take().is_some() {
            debug!("{} closed", self.name);
        }
        Ok(())
    }
}

/// Endpoint of a local pair: its sending half and its inbound stream
pub struct LocalEndpoint {
    pub channel: LocalSignalingChannel,
    pub inbound: mpsc::UnboundedReceiver<SignalingMessage>,
}

/// Two cross-connected endpoints: what `a` sends, `b` receives and vice versa
pub fn local_channel_pair() -> (LocalEndpoint, LocalEndpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let a = LocalEndpoint {
        channel: LocalSignalingChannel::new("local-a", a_tx),
        inbound: a_rx,
    };
    let b = LocalEndpoint {
        channel: LocalSignalingChannel::new("local-b", b_tx),
        inbound: b_rx,
    };
    (a, b)
}
