//! callsig binary entry point
//!
//! Runs the recording server, a client that calls it, or a two-session
//! loopback call inside one process.
//!
//! # Usage
//!
//! ```bash
//! # Recording server on 0.0.0.0:3000, files written to ./recordings
//! cargo run --bin callsig -- --mode server --record-dir ./recordings
//!
//! # Client calling the server with a 500 kbps cap
//! RECORD_SERVER_IP=127.0.0.1 cargo run --bin callsig -- --mode client --bandwidth 500
//!
//! # Loopback call that drops to 125 kbps after five seconds
//! cargo run --bin callsig -- --mode loopback \
//!   --bandwidth 2000 --change-bandwidth 125 --change-after-secs 5
//! ```

use callsig::{
    local_channel_pair, BandwidthLimit, CallConfig, CallSession, CallState, MediaConstraints,
    NegotiationRole, NoLocalMedia, RecordingServer, SessionHandle, SessionOptions,
    SyntheticMediaSource, TurnServerConfig, WebRtcPeer, WebSocketSignalingClient,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Two-endpoint WebRTC calls with bandwidth caps
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// What to run: recording server, client, or in-process loopback call
    #[arg(short, long, default_value = "loopback", env = "CALLSIG_MODE")]
    mode: Mode,

    /// Server bind address (server mode) or the address to call (client mode)
    #[arg(long, default_value = "0.0.0.0", env = "RECORD_SERVER_IP")]
    server_ip: String,

    /// Server port
    #[arg(long, default_value_t = 3000, env = "RECORD_SERVER_PORT")]
    server_port: u16,

    /// Bandwidth cap: "unlimited" or kbps
    #[arg(long, default_value = "unlimited", env = "CALLSIG_BANDWIDTH")]
    bandwidth: BandwidthLimit,

    /// Directory recordings are written to (server mode)
    #[arg(long, default_value = "recordings", env = "CALLSIG_RECORD_DIR")]
    record_dir: PathBuf,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "CALLSIG_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "CALLSIG_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Maximum concurrent recording sessions (server mode)
    #[arg(long, default_value_t = 8)]
    max_sessions: u32,

    /// Capture audio as well as video (client and loopback modes)
    #[arg(long, default_value_t = false)]
    audio: bool,

    /// Bandwidth cap to switch to mid-call (loopback mode)
    #[arg(long)]
    change_bandwidth: Option<BandwidthLimit>,

    /// Seconds after connecting before the change is applied
    #[arg(long, default_value_t = 5)]
    change_after_secs: u64,

    /// Seconds to keep the loopback call up
    #[arg(long, default_value_t = 15)]
    duration_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// WebSocket recording server
    Server,
    /// Call the recording server with synthetic media
    Client,
    /// Caller and answerer in one process
    Loopback,
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> Result<TurnServerConfig, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        ));
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        return Err(format!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        ));
    }

    // Password may contain colons
    Ok(TurnServerConfig {
        url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
        username: parts[3].to_string(),
        credential: parts[4..].join(":"),
    })
}

/// Build CallConfig from CLI arguments
fn build_config_from_args(args: &Args) -> Result<CallConfig, Box<dyn std::error::Error>> {
    let mut media = MediaConstraints::default();
    if !args.audio {
        media.audio = None;
    }

    let mut turn_servers = Vec::new();
    for turn_str in &args.turn_servers {
        let turn_config =
            parse_turn_server(turn_str).map_err(|e| format!("Failed to parse TURN server: {}", e))?;
        info!(
            "Adding TURN server: {} (user: {})",
            turn_config.url, turn_config.username
        );
        turn_servers.push(turn_config);
    }

    let config = CallConfig {
        signaling_url: format!("ws://{}:{}", args.server_ip, args.server_port),
        listen_ip: args.server_ip.clone(),
        listen_port: args.server_port,
        stun_servers: args.stun_servers.clone(),
        max_sessions: args.max_sessions,
        ..Default::default()
    }
    .with_turn_servers(turn_servers)
    .with_bandwidth(args.bandwidth)
    .with_media(media)
    .with_recording_dir(&args.record_dir);

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("callsig-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = callsig::version(),
        mode = ?args.mode,
        "callsig starting"
    );

    let config = build_config_from_args(&args)?;
    info!(
        bandwidth = %config.bandwidth,
        stun_servers = config.stun_servers.len(),
        turn_servers = config.turn_servers.len(),
        "Configuration loaded"
    );

    match args.mode {
        Mode::Server => run_server(config, shutdown_flag).await?,
        Mode::Client => run_client(config, shutdown_flag).await?,
        Mode::Loopback => run_loopback(config, &args, shutdown_flag).await?,
    }

    Ok(())
}

async fn wait_for_shutdown(shutdown_flag: &AtomicBool) {
    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn run_server(
    config: CallConfig,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = RecordingServer::new(Arc::new(config));
    let handle = server.start().await?;
    info!("Server running on {}. Press Ctrl+C to shutdown.", handle.local_addr());

    wait_for_shutdown(&shutdown_flag).await;

    info!(
        active_sessions = handle.active_sessions(),
        "Shutdown signal received, cleaning up..."
    );
    handle.shutdown().await;
    Ok(())
}

async fn run_client(
    config: CallConfig,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (channel, inbound) = WebSocketSignalingClient::connect(&config.signaling_url).await?;

    let (peer_tx, peer_rx) = mpsc::unbounded_channel();
    let peer = WebRtcPeer::new(&config, peer_tx).await?;

    let session = CallSession::new(
        NegotiationRole::Answerer,
        Arc::new(peer),
        Arc::new(channel),
        Arc::new(SyntheticMediaSource::new()),
    )
    .with_constraints(config.media.clone())
    .with_bandwidth(config.bandwidth);

    let (handle, mut task) = session.spawn(inbound, peer_rx);
    info!(session_id = handle.id(), "Calling {}", config.signaling_url);

    tokio::select! {
        result = &mut task => {
            result??;
            info!("Call ended");
            return Ok(());
        }
        _ = wait_for_shutdown(&shutdown_flag) => {
            info!("Shutdown signal received, hanging up");
        }
    }

    let _ = handle.hangup();
    task.await??;
    Ok(())
}

async fn run_loopback(
    config: CallConfig,
    args: &Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (caller_end, answerer_end) = local_channel_pair();

    let options = SessionOptions::default();

    let (caller_peer_tx, caller_peer_rx) = mpsc::unbounded_channel();
    let caller_peer = WebRtcPeer::new(&config, caller_peer_tx).await?;
    let caller = CallSession::new(
        NegotiationRole::Caller,
        Arc::new(caller_peer),
        Arc::new(caller_end.channel),
        Arc::new(SyntheticMediaSource::new()),
    )
    .with_id("caller")
    .with_constraints(config.media.clone())
    .with_bandwidth(config.bandwidth)
    .with_options(options.clone());

    let (answerer_peer_tx, answerer_peer_rx) = mpsc::unbounded_channel();
    let answerer_peer = WebRtcPeer::new(&config, answerer_peer_tx).await?;
    let answerer = CallSession::new(
        NegotiationRole::Answerer,
        Arc::new(answerer_peer),
        Arc::new(answerer_end.channel),
        Arc::new(NoLocalMedia),
    )
    .with_id("answerer")
    .with_constraints(MediaConstraints::none())
    .with_bandwidth(config.bandwidth)
    .with_options(options);

    let (answerer_handle, answerer_task) = answerer.spawn(answerer_end.inbound, answerer_peer_rx);
    let (mut caller_handle, caller_task) = caller.spawn(caller_end.inbound, caller_peer_rx);

    let call = drive_loopback(&mut caller_handle, args);
    tokio::select! {
        result = call => {
            if let Err(e) = result {
                warn!("Loopback call did not complete: {}", e);
            }
        }
        _ = wait_for_shutdown(&shutdown_flag) => {
            info!("Shutdown signal received, hanging up");
        }
    }

    hang_up(&caller_handle);
    hang_up(&answerer_handle);
    caller_task.await??;
    answerer_task.await??;
    info!("Loopback call finished");
    Ok(())
}

async fn drive_loopback(
    caller: &mut SessionHandle,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    caller.wait_for(CallState::Connected).await?;
    info!("Loopback call connected");

    let started = tokio::time::Instant::now();
    let duration = Duration::from_secs(args.duration_secs);

    if let Some(limit) = args.change_bandwidth {
        let delay = Duration::from_secs(args.change_after_secs);
        if delay < duration {
            tokio::time::sleep(delay).await;
            info!(bandwidth = %limit, "Changing bandwidth cap");
            caller.set_bandwidth(limit)?;
        }
    }

    tokio::time::sleep_until(started + duration).await;
    Ok(())
}

fn hang_up(handle: &SessionHandle) {
    if handle.state() != CallState::Closed {
        let _ = handle.hangup();
    }
}

fn init_tracing() {
    // RUST_LOG wins; "info" otherwise
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
