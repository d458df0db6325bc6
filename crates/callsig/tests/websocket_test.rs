//! Recording server and WebSocket client over a loopback socket

use callsig::{
    BandwidthLimit, CallConfig, RecordingServer, SignalingChannel, SignalingMessage,
    WebSocketSignalingClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn start_server(
    config: CallConfig,
) -> (callsig::RecordingServerHandle, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let handle = RecordingServer::new(Arc::new(config))
        .serve(listener)
        .await
        .unwrap();
    let url = format!("ws://{}", handle.local_addr());
    (handle, url)
}

#[tokio::test]
async fn test_server_offers_with_configured_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = CallConfig::default()
        .with_bandwidth(BandwidthLimit::Kbps(500))
        .with_recording_dir(dir.path());
    let (server, url) = start_server(config).await;

    let (client, mut inbound) = WebSocketSignalingClient::connect(&url).await.unwrap();

    let offer = loop {
        let message = tokio::time::timeout(TIMEOUT, inbound.recv())
            .await
            .expect("no offer from server")
            .expect("server closed the socket");
        match message {
            SignalingMessage::Offer(offer) => break offer,
            SignalingMessage::IceCandidate(_) => continue,
            other => panic!("unexpected message {:?}", other),
        }
    };

    assert!(offer.sdp.contains("b=AS:500\r\n"));
    assert!(offer.sdp.contains("a=recvonly"));
    assert_eq!(server.active_sessions(), 1);

    client.close().await.unwrap();
    assert!(client
        .send(SignalingMessage::IceCandidate(None))
        .await
        .is_err());

    // The server hangs its session up once the socket goes away
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.active_sessions() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.active_sessions(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_rejects_connections_over_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CallConfig::default().with_recording_dir(dir.path());
    config.max_sessions = 1;
    let (server, url) = start_server(config).await;

    let (_first, mut first_inbound) = WebSocketSignalingClient::connect(&url).await.unwrap();
    let first = tokio::time::timeout(TIMEOUT, first_inbound.recv()).await.unwrap();
    assert!(first.is_some());

    // Dropped before the handshake completes
    let second = WebSocketSignalingClient::connect(&url).await;
    assert!(second.is_err());
    assert_eq!(server.active_sessions(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_nothing_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WebSocketSignalingClient::connect(&format!("ws://{}", addr)).await;
    assert!(matches!(result, Err(callsig::Error::WebSocketError(_))));
}
