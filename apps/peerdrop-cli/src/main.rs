mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peerdrop_negotiation::WebRtcConnector;
use peerdrop_rendezvous::{LinkState, RendezvousClient};
use peerdrop_session::{SessionConfig, SessionController, SessionEvent, SessionHandle};
use peerdrop_transfer::{FileSource, FsChunkStore, SendEvent, SendOutcome};

use config::PeerConfig;

#[derive(Debug, Parser)]
#[command(name = "peerdrop", version, about = "Peer-to-peer file transfer")]
struct Cli {
    /// Config file (default: ~/.config/peerdrop/peer.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signaling relay URL, overrides the config file.
    #[arg(long, global = true)]
    relay: Option<String>,

    /// More logging (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Send files, creating a room unless one is given.
    Send {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Join this room instead of creating one.
        #[arg(long)]
        room: Option<String>,
    },
    /// Join a room and receive files.
    Receive {
        room: String,
        /// Directory for received files.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Accept every offer without asking.
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = PeerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(relay) = cli.relay {
        cfg.relay_url = relay;
    }
    info!(relay = %cfg.relay_url, store = %cfg.store_dir.display(), "starting");

    let connector = Arc::new(WebRtcConnector::new(&cfg.ice_servers)?);
    let store = Arc::new(FsChunkStore::new(&cfg.store_dir));
    let session_config = SessionConfig {
        relay_url: cfg.relay_url.clone(),
        transfer: cfg.transfer,
    };
    let (session, events) =
        SessionController::spawn(session_config, RendezvousClient::default(), connector, store);

    let ok = match cli.command {
        Mode::Send { files, room } => run_send(&session, events, files, room).await?,
        Mode::Receive { room, out, yes } => run_receive(&session, events, room, out, yes).await?,
    };

    if let Err(e) = session.leave().await {
        warn!("leave: {e}");
    }
    session.shutdown().await;

    if !ok {
        anyhow::bail!("not every transfer succeeded");
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "info,peerdrop=debug",
        _ => "debug,peerdrop=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Returns `true` when every file was delivered.
async fn run_send(
    session: &SessionHandle,
    mut events: tokio::sync::mpsc::Receiver<SessionEvent>,
    paths: Vec<PathBuf>,
    room: Option<String>,
) -> anyhow::Result<bool> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let source = FileSource::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        files.push(source);
    }
    let total = files.len();

    match room {
        Some(room) => session.join(room).await?,
        None => session.create().await?,
    }
    session.send_files(files).await?;

    let mut delivered = 0;
    let mut finished = 0;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                return Ok(false);
            }
        };
        let Some(event) = event else { break };

        match event {
            SessionEvent::RoomCreated(code) => println!("room code: {code}"),
            SessionEvent::Outgoing(SendEvent::Offered(meta)) => {
                println!("offering {} ({})", meta.name, output::human_bytes(meta.size));
            }
            SessionEvent::Outgoing(SendEvent::Progress(p)) => output::progress_line(&p),
            SessionEvent::Outgoing(SendEvent::Finished { meta, outcome }) => {
                finished += 1;
                match outcome {
                    SendOutcome::Delivered { bytes } => {
                        delivered += 1;
                        println!("sent {} ({})", meta.name, output::human_bytes(bytes));
                    }
                    SendOutcome::Rejected => println!("{} was rejected", meta.name),
                    SendOutcome::Cancelled => println!("{} was cancelled", meta.name),
                    SendOutcome::Failed(reason) => println!("{} failed: {reason}", meta.name),
                }
            }
            SessionEvent::Outgoing(SendEvent::QueueDrained) if finished >= total => break,
            SessionEvent::Error(message) => warn!("{message}"),
            event => log_common(&event),
        }
    }

    Ok(delivered == total)
}

/// Returns `true` unless an incoming transfer failed.
async fn run_receive(
    session: &SessionHandle,
    mut events: tokio::sync::mpsc::Receiver<SessionEvent>,
    room: String,
    out: PathBuf,
    auto_accept: bool,
) -> anyhow::Result<bool> {
    tokio::fs::create_dir_all(&out).await?;
    session.join(room).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut ok = true;
    let mut received_any = false;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else { break };

        match event {
            SessionEvent::IncomingOffer(meta) => {
                println!(
                    "incoming {} ({}, {})",
                    meta.name,
                    output::human_bytes(meta.size),
                    meta.mime_type
                );
                let accept = auto_accept || {
                    println!("accept? [y/N]");
                    matches!(stdin.next_line().await?, Some(line) if line.trim().eq_ignore_ascii_case("y"))
                };
                if accept {
                    session.accept().await?;
                } else {
                    session.reject().await?;
                }
            }
            SessionEvent::IncomingProgress(p) => output::progress_line(&p),
            SessionEvent::FileReceived(file) => {
                received_any = true;
                let path = output::write_received(&out, &file).await?;
                println!("saved {} (sha256 {})", path.display(), file.sha256);
            }
            SessionEvent::IncomingFailed { name, reason } => {
                ok = false;
                println!("{name} failed: {reason}");
            }
            SessionEvent::PeerLeft if received_any => break,
            SessionEvent::Error(message) => warn!("{message}"),
            event => log_common(&event),
        }
    }

    Ok(ok)
}

fn log_common(event: &SessionEvent) {
    match event {
        SessionEvent::Joined { room, role } => info!(room = %room, ?role, "joined room"),
        SessionEvent::PeerJoined => info!("peer joined"),
        SessionEvent::PeerLeft => info!("peer left"),
        SessionEvent::ChannelOpen => info!("connected to peer"),
        SessionEvent::Negotiation(state) => tracing::debug!(?state, "negotiation"),
        SessionEvent::Relay(LinkState::Reconnecting { attempt }) => {
            warn!(attempt, "relay connection lost, reconnecting");
        }
        SessionEvent::Relay(LinkState::Disconnected) => warn!("relay disconnected"),
        SessionEvent::Disconnected => warn!("peer connection lost"),
        other => tracing::trace!(?other, "session event"),
    }
}
