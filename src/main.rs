//! chunkmesh peer binary.
//!
//! Starts one peer: a DHT node, a chunk server over the share directory, and
//! optionally one download. Without a file argument the peer only serves.
//!
//! # Usage
//!
//! ```bash
//! chunkmesh 6000 6881                # serve only
//! chunkmesh 6000 6881 x.bin          # download x.bin, then keep serving
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chunkmesh::{Peer, PeerConfig, DEFAULT_BOOTSTRAP_FILE};

/// Peer-to-peer file exchange over a Kademlia-style UDP DHT.
#[derive(Parser)]
#[command(name = "chunkmesh", version, about)]
struct Cli {
    /// Chunk-protocol listen port.
    peer_port: u16,

    /// DHT listen port.
    dht_port: u16,

    /// File to download; omit to serve only.
    file: Option<String>,

    /// Directory of shared files.
    #[arg(long, default_value = "shared")]
    share_dir: PathBuf,

    /// Well-known bootstrap address file, one ip:port per line.
    #[arg(long, default_value = DEFAULT_BOOTSTRAP_FILE)]
    bootstrap_file: PathBuf,

    /// Address to bind and advertise.
    #[arg(long, default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let peer = Peer::start(PeerConfig {
        ip: cli.ip,
        peer_port: cli.peer_port,
        dht_port: cli.dht_port,
        share_dir: cli.share_dir,
        bootstrap_file: cli.bootstrap_file,
    })
    .await?;

    if let Some(file) = &cli.file {
        peer.download_file(file).await?;
        info!("downloaded {file:?}, now serving it");
    }

    signal::ctrl_c().await?;
    info!("shutting down");
    peer.shutdown().await;
    Ok(())
}
