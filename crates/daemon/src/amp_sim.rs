use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use bci_daemon::load_config;
use clap::Parser;
use dispatch::BatchSource;
use log::{info, warn};
use protocol::BatchLayout;

/// Simulated amplifier streaming sample batches over UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Destination of the batches, defaults to the configured UDP endpoint
    #[arg(long)]
    target: Option<SocketAddr>,

    /// Configuration providing channel count, rate and batch size
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Milliseconds between batches, defaults to the batch duration
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Send every Nth batch twice
    #[arg(long, default_value_t = 0)]
    duplicate_every: u64,

    /// Withhold every Nth batch
    #[arg(long, default_value_t = 0)]
    drop_every: u64,

    /// Stop after this many batches, otherwise run until interrupted
    #[arg(long)]
    count: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args.config)?;

    let target = args
        .target
        .unwrap_or_else(|| SocketAddr::V4(config.network.udp_dispatcher.socket_addr()));
    let layout = BatchLayout::new(config.adc.channels, config.dataset.batch_samples as usize);
    // 80 samples at 2 kHz is one batch every 40 ms
    let interval = Duration::from_millis(args.interval_ms.unwrap_or_else(|| {
        (config.dataset.batch_samples as u64 * 1000 / config.adc.sampling_rate as u64).max(1)
    }));

    let socket = UdpSocket::bind("0.0.0.0:0").context("binding the simulator socket")?;
    let mut source = BatchSource::new(layout, config.adc.sampling_rate)
        .duplicate_every(args.duplicate_every)
        .drop_every(args.drop_every);

    info!(
        "Sending {}-byte batches to {} every {:?}",
        source.layout().frame_len(),
        target,
        interval
    );

    let mut sent = 0u64;
    let mut next = Instant::now();
    while args.count.map_or(true, |c| sent < c) {
        for datagram in source.next_datagrams()? {
            if let Err(e) = socket.send_to(&datagram, target) {
                warn!("Failed to send batch: {}", e);
            }
        }
        sent += 1;

        next += interval;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    info!("Sent {} batches, next counter {}", sent, source.counter());
    Ok(())
}
