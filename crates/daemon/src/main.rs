use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bci_daemon::{load_config, LinkMonitor, MoveCommand};
use bci_types::{DispatchEvent, EventCode, LinkConfig};
use clap::{Parser, Subcommand};
use dispatch::{LinkSettings, OutboundQueues, TcpDispatcher, UdpDispatcher};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Time given to the event loop to flush queued payloads before stopping.
const STOP_FLUSH: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "BCI lab link daemon", long_about = None)]
struct Args {
    /// Path to the link configuration
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Serve the event channel and ingest amplifier batches
    Dashboard {
        /// Send START with this lock delay when the game connects
        #[arg(long)]
        start_game: Option<u8>,
    },
    /// Connect to the dashboard and send moves read from stdin
    Game,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.role {
        Role::Dashboard { start_game } => run_dashboard(&config, start_game).await,
        Role::Game => run_game(&config).await,
    }
}

async fn run_dashboard(config: &LinkConfig, lock_delay: Option<u8>) -> anyhow::Result<()> {
    let tcp_config = &config.network.tcp_dispatcher;
    let queues = OutboundQueues::from_abonents(&tcp_config.abonents);
    let game_ip = queues.ip_of("game");
    let (event_tx, event_rx) = flume::unbounded();

    let tcp = TcpDispatcher::start(
        LinkSettings::acceptor(tcp_config),
        queues.clone(),
        event_tx.clone(),
    )
    .context("starting the event channel")?;
    let udp = UdpDispatcher::from_config(config, event_tx).context("starting sample ingest")?;
    info!("Dashboard running, press Ctrl-C to stop");

    let mut monitor = LinkMonitor::new(config);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("waiting for Ctrl-C")?;
                info!("Shutdown signal received. Stopping dispatchers...");
                break;
            }
            event = event_rx.recv_async() => {
                let Ok(event) = event else { break };
                monitor.observe(&event);
                if let (DispatchEvent::NewClient(ip), Some(delay)) = (&event, lock_delay) {
                    if Some(*ip) == game_ip {
                        info!("Starting game with lock delay {}", delay);
                        let delay = vec![delay as u32];
                        queues.send_event("game", EventCode::Start as u8, 0, 8, delay)?;
                    }
                }
            }
        }
    }

    if lock_delay.is_some() && monitor.is_connected("game") {
        queues.send_event("game", EventCode::Stop as u8, 0, 8, Vec::new())?;
        tokio::time::sleep(STOP_FLUSH).await;
    }
    tcp.stop();
    udp.stop();
    info!("Dashboard stopped gracefully.");
    Ok(())
}

async fn run_game(config: &LinkConfig) -> anyhow::Result<()> {
    let tcp_config = &config.network.tcp_dispatcher;
    let queues = OutboundQueues::for_server(tcp_config.server_ip);
    let (event_tx, event_rx) = flume::unbounded();

    let tcp = TcpDispatcher::start(LinkSettings::initiator(tcp_config), queues.clone(), event_tx)
        .context("starting the event channel")?;
    info!("Game running, type moves as '<up|down|left|right> <score>'");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("waiting for Ctrl-C")?;
                info!("Shutdown signal received. Stopping dispatcher...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<MoveCommand>() {
                    Ok(cmd) => queues.enqueue(tcp_config.server_ip, cmd.to_payload()?)?,
                    Err(e) => warn!("Ignoring '{}': {}", line.trim(), e),
                }
            }
            event = event_rx.recv_async() => {
                match event {
                    Ok(DispatchEvent::NewClient(ip)) => info!("Connected to dashboard at {}", ip),
                    Ok(DispatchEvent::ClientLeft(ip)) => warn!("Lost dashboard at {}", ip),
                    Ok(DispatchEvent::Packet { packet, .. }) => match packet.code() {
                        Some(code) => info!("Dashboard sent {} {:?}", code.name(), packet.payload),
                        None => warn!("Unknown event code {}", packet.event_code),
                    },
                    Ok(DispatchEvent::SampleBatch(_)) => {}
                    Err(_) => {
                        error!("Event channel closed");
                        break;
                    }
                }
            }
        }
    }

    if queues.has_pending(tcp_config.server_ip) {
        tokio::time::sleep(STOP_FLUSH).await;
    }
    tcp.stop();
    info!("Game stopped gracefully.");
    Ok(())
}
