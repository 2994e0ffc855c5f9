//! Peer assembly: one DHT node plus one chunk server over a share directory.
//!
//! A peer bootstraps its DHT node from a line-oriented address file, scans
//! its share directory and announces every regular file it already holds,
//! then serves chunk requests while optionally downloading more files.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::node::DhtNode;
use crate::serve::ChunkServer;
use crate::transfer;

/// Default name of the well-known bootstrap address file.
pub const DEFAULT_BOOTSTRAP_FILE: &str = "main_dht_addresses.txt";

/// Everything needed to start a peer.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Address the chunk server and DHT node bind (and advertise).
    pub ip: IpAddr,
    /// Chunk-protocol port.
    pub peer_port: u16,
    /// DHT-protocol port.
    pub dht_port: u16,
    /// Directory of files this peer shares and downloads into.
    pub share_dir: PathBuf,
    /// Line-oriented `ip:port` file seeding the routing table.
    pub bootstrap_file: PathBuf,
}

/// A running peer process.
pub struct Peer {
    node: Arc<DhtNode>,
    serve_addr: SocketAddr,
    share_dir: PathBuf,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Bind both sockets, bootstrap the DHT, announce existing files, and
    /// start serving chunks.
    pub async fn start(config: PeerConfig) -> Result<Peer> {
        tokio::fs::create_dir_all(&config.share_dir)
            .await
            .with_context(|| format!("creating share dir {}", config.share_dir.display()))?;

        let node = DhtNode::bind(SocketAddr::new(config.ip, config.dht_port)).await?;
        node.start().await;

        let bootstrap = load_bootstrap(&config.bootstrap_file);
        node.bootstrap(&bootstrap).await;

        let server =
            ChunkServer::bind(SocketAddr::new(config.ip, config.peer_port), &config.share_dir)
                .await?;
        let serve_addr = server.local_addr();
        let server_task = tokio::spawn(async move { server.run().await });

        let peer = Peer {
            node,
            serve_addr,
            share_dir: config.share_dir,
            server_task: Mutex::new(Some(server_task)),
        };
        peer.announce_shared_files().await?;
        Ok(peer)
    }

    /// The DHT node, for lookups and announcements.
    pub fn node(&self) -> &Arc<DhtNode> {
        &self.node
    }

    /// The endpoint other peers fetch chunks from.
    pub fn serve_addr(&self) -> SocketAddr {
        self.serve_addr
    }

    /// Fetch a file from the network into the share directory.
    pub async fn download_file(&self, file_name: &str) -> Result<(), TransferError> {
        transfer::download(&self.node, self.serve_addr, &self.share_dir, file_name).await
    }

    /// Stop the DHT node and the chunk server.
    pub async fn shutdown(&self) {
        self.node.shutdown().await;
        if let Some(task) = self.server_task.lock().await.take() {
            task.abort();
        }
    }

    /// Announce every regular file already present in the share directory.
    /// Subdirectories are reported and skipped.
    async fn announce_shared_files(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.share_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("skipping file with non-UTF-8 name: {name:?}");
                continue;
            };
            if entry.file_type().await?.is_dir() {
                info!("found directory (will not be shared): {name}");
                continue;
            }
            info!("announcing existing file {name}");
            self.node.announce(name, self.serve_addr).await;
        }
        Ok(())
    }
}

/// Read bootstrap `ip:port` addresses, one per line. An unreadable file is
/// logged and yields an empty list; unparsable lines are logged and skipped.
pub fn load_bootstrap(path: &Path) -> Vec<SocketAddr> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!("could not read bootstrap file {}: {err}", path.display());
            return Vec::new();
        }
    };
    let mut addrs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse() {
            Ok(addr) => addrs.push(addr),
            Err(err) => debug!("skipping bootstrap line {line:?}: {err}"),
        }
    }
    addrs
}
