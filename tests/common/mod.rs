use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use chunkmesh::{DhtNode, Peer, PeerConfig};

/// Bind and start a DHT node on an ephemeral localhost port.
pub async fn spawn_node() -> Arc<DhtNode> {
    let node = DhtNode::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind node");
    node.start().await;
    node
}

/// A peer with its own temporary share directory.
pub struct TestPeer {
    pub peer: Peer,
    pub dir: TempDir,
}

impl TestPeer {
    pub fn share_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("shared")
    }
}

/// Start a peer on ephemeral ports, seeded with the given bootstrap
/// addresses and pre-populated shared files.
pub async fn spawn_peer(bootstrap: &[SocketAddr], files: &[(&str, &[u8])]) -> TestPeer {
    let dir = tempfile::tempdir().expect("create temp dir");
    let share_dir = dir.path().join("shared");
    std::fs::create_dir_all(&share_dir).expect("create share dir");
    for (name, contents) in files {
        std::fs::write(share_dir.join(name), contents).expect("write shared file");
    }

    let bootstrap_file = dir.path().join("main_dht_addresses.txt");
    let lines: Vec<String> = bootstrap.iter().map(|addr| addr.to_string()).collect();
    std::fs::write(&bootstrap_file, lines.join("\n")).expect("write bootstrap file");

    let peer = Peer::start(PeerConfig {
        ip: "127.0.0.1".parse().unwrap(),
        peer_port: 0,
        dht_port: 0,
        share_dir,
        bootstrap_file,
    })
    .await
    .expect("start peer");
    TestPeer { peer, dir }
}

/// A deterministic payload of the given length.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Read a file from a share directory.
pub fn read_shared(dir: &Path, name: &str) -> Vec<u8> {
    std::fs::read(dir.join(name)).expect("read shared file")
}
