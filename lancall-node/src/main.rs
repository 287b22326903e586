//! lancall-node — entry point.
//!
//! ```text
//! lancall-node                        Run with lancall.toml (or defaults)
//! lancall-node --config <path>        Load a custom config TOML
//! lancall-node --gen-config           Write default config to stdout
//! lancall-node --nickname alice       Override the nickname
//! lancall-node --peer 192.168.1.7:45454   Announce straight at a peer
//! lancall-node --allow-loopback       Two instances on one machine
//! ```
//!
//! Stdin lines are sent as chat messages; everything the session
//! reports lands in the log.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use lancall_core::{CaptureInput, DiscoveryTargets, SessionEvent, SessionScheduler};
use lancall_node::config::NodeConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lancall-node", about = "Headless lancall peer (chat + diagnostics)")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lancall.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the configured nickname.
    #[arg(short, long)]
    nickname: Option<String>,

    /// Override the configured UDP port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Skip broadcast discovery and announce straight at this peer.
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// Accept datagrams from this host's own addresses.
    #[arg(long)]
    allow_loopback: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&NodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config and apply CLI overrides.
    let mut config = NodeConfig::load(&cli.config);
    if let Some(nickname) = cli.nickname {
        config.session.nickname = nickname;
    }
    if let Some(port) = cli.port {
        config.session.network.port = port;
    }
    if cli.allow_loopback {
        config.session.network.allow_loopback = true;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lancall-node v{}", env!("CARGO_PKG_VERSION"));
    info!("port: {}", config.session.network.port);

    let (mut scheduler, mut handle) = SessionScheduler::bind(config.session).await?;
    if let Some(peer) = cli.peer {
        info!(%peer, "announcing directly, broadcast disabled");
        scheduler
            .session_mut()
            .set_discovery_targets(DiscoveryTargets::explicit(vec![peer]));
    }
    info!("bound to {}", handle.local_addr());
    info!("type a line to chat; Ctrl-C to quit");

    let session_task = tokio::spawn(scheduler.run());

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                handle.shutdown();
                break;
            }

            line = stdin_lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        handle.send(CaptureInput::Text(line.to_string())).await?;
                    }
                }
                Ok(None) => {
                    // Stdin closed (piped input ended); keep serving.
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },

            event = handle.next_event() => match event {
                Some(event) => report(event),
                None => {
                    warn!("session ended");
                    break;
                }
            },
        }
    }

    session_task.await??;
    Ok(())
}

/// Route a session event to the log. A real frontend would feed the
/// speaker, screen and chat pane instead.
fn report(event: SessionEvent) {
    match event {
        SessionEvent::PeerDiscovered { nickname, addr } => {
            info!(%nickname, %addr, "peer joined")
        }
        SessionEvent::PeerLost => info!("peer lost"),
        SessionEvent::Text { nickname, text } => info!("<{nickname}> {text}"),
        SessionEvent::PlayAudio(pcm) => trace!(bytes = pcm.len(), "audio block ready"),
        SessionEvent::DisplayVideo(frame) => trace!(
            sequence = frame.sequence,
            bytes = frame.jpeg.len(),
            "video frame ready"
        ),
        SessionEvent::VideoBuffering(buffering) => debug!(buffering, "video buffering state"),
        SessionEvent::AudioFormatRequested { sample_rate } => {
            info!(sample_rate, "peer requested audio format")
        }
        SessionEvent::Stats(snapshot) => match serde_json::to_string(&snapshot) {
            Ok(json) => info!("stats {json}"),
            Err(e) => warn!(error = %e, "stats serialization failed"),
        },
    }
}
