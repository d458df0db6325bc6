//! Recording server
//!
//! Accepts WebSocket connections and runs one caller session per socket.
//! The server side sends no media of its own: it offers receive-only
//! transceivers and records whatever the remote endpoint sends back.

use super::client::WebSocketSignalingClient;
use crate::config::{CallConfig, MediaConstraints};
use crate::media::NoLocalMedia;
use crate::peer::{DiskRecorder, Recorder, WebRtcPeer};
use crate::session::{CallSession, NegotiationRole};
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// WebSocket recording server
pub struct RecordingServer {
    config: Arc<CallConfig>,
}

/// Handle to a running server
pub struct RecordingServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    active: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl RecordingServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sessions currently running
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting, hang up every session and wait for the accept loop
    pub async fn shutdown(self) {
        info!("Shutting down recording server");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            error!("Recording server task panicked: {}", e);
        }
    }
}

/// Decrements the active-session count when a connection ends
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecordingServer {
    pub fn new(config: Arc<CallConfig>) -> Self {
        Self { config }
    }

    /// Bind to the configured address and start the accept loop
    pub async fn start(self) -> Result<RecordingServerHandle> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Start the accept loop on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<RecordingServerHandle> {
        let local_addr = listener.local_addr()?;
        info!("Recording server listening on ws://{}", local_addr);

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let active = Arc::new(AtomicUsize::new(0));

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shutdown = shutdown_tx.clone();
        let accept_active = Arc::clone(&active);
        let config = self.config;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let max = config.max_sessions as usize;
                                if accept_active.load(Ordering::SeqCst) >= max {
                                    warn!(
                                        "Rejecting connection from {}: {} sessions already running",
                                        peer_addr, max
                                    );
                                    drop(stream);
                                    continue;
                                }
                                accept_active.fetch_add(1, Ordering::SeqCst);
                                let slot = SessionSlot(Arc::clone(&accept_active));

                                info!("Accepted connection from {}", peer_addr);
                                let config = Arc::clone(&config);
                                let shutdown = accept_shutdown.subscribe();
                                tokio::spawn(async move {
                                    let _slot = slot;
                                    if let Err(e) = handle_connection(stream, config, shutdown).await {
                                        error!("Session for {} ended with error: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Recording server received shutdown signal");
                        break;
                    }
                }
            }

            info!("Recording server accept loop exited");
        });

        Ok(RecordingServerHandle {
            local_addr,
            shutdown_tx,
            active,
            task,
        })
    }
}

/// Run one recording session over an accepted socket
async fn handle_connection(
    stream: TcpStream,
    config: Arc<CallConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::WebSocketError(format!("Handshake with {} failed: {}", addr, e)))?;

    let (channel, inbound) = WebSocketSignalingClient::attach(ws_stream, addr.to_string());

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let peer = WebRtcPeer::new(&config, peer_tx).await?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let recorder = DiskRecorder::new(&config.recording_dir, &session_id);
    recorder.prepare_for_offer(&peer.peer_connection()).await?;

    let session = CallSession::new(
        NegotiationRole::Caller,
        Arc::new(peer),
        Arc::new(channel),
        Arc::new(NoLocalMedia),
    )
    .with_id(session_id.clone())
    .with_constraints(MediaConstraints::none())
    .with_bandwidth(config.bandwidth);

    info!(session_id = %session_id, remote = %addr, "Starting recording session");
    let (handle, mut task) = session.spawn(inbound, peer_rx);

    let outcome = tokio::select! {
        joined = &mut task => joined,
        _ = shutdown.recv() => {
            debug!(session_id = %session_id, "Server shutting down, hanging up");
            let _ = handle.hangup();
            task.await
        }
    };

    if let Err(e) = recorder.finish().await {
        warn!(session_id = %session_id, "Failed to finish recording: {}", e);
    }

    match outcome {
        Ok(result) => result,
        Err(e) => Err(Error::Other(anyhow::anyhow!("session task failed: {}", e))),
    }
}
