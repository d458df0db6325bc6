//! WebSocket signaling transport

pub mod client;
pub mod server;

pub use client::WebSocketSignalingClient;
pub use server::{RecordingServer, RecordingServerHandle};
