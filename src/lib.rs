//! # chunkmesh
//!
//! Serverless file exchange between independent peers. The crate combines a
//! Kademlia-inspired distributed hash table, which maps content hashes to
//! provider endpoints via XOR-distance routing over UDP, with a concurrent
//! chunked transfer engine that rides on top of it.
//!
//! The crate is split into a handful of modules that can be reused
//! independently:
//!
//! - [`core`]: identity, XOR distance, the bounded routing table, and the
//!   TTL-expiring provider store.
//! - [`protocol`]: the pipe-delimited wire messages of the DHT protocol and
//!   the chunk protocol.
//! - [`node`]: the [`DhtNode`] state machine: listener, refresher, RPC
//!   correlation, and the iterative lookup engine.
//! - [`transfer`]: batched parallel chunk retrieval with in-order reassembly.
//! - [`serve`]: the passive [`ChunkServer`] answering size and chunk queries
//!   from disk.
//! - [`peer`]: glue assembling a node, a chunk server, and a share directory
//!   into one peer process.
//!
//! ## Getting started
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use anyhow::Result;
//! use chunkmesh::{Peer, PeerConfig};
//!
//! # async fn launch() -> Result<()> {
//! let peer = Peer::start(PeerConfig {
//!     ip: "127.0.0.1".parse()?,
//!     peer_port: 6000,
//!     dht_port: 6881,
//!     share_dir: PathBuf::from("shared"),
//!     bootstrap_file: PathBuf::from("main_dht_addresses.txt"),
//! })
//! .await?;
//! peer.download_file("x.bin").await?;
//! # Ok(())
//! # }
//! ```
//!
//! The binary in `src/main.rs` wires these pieces together into a peer that
//! serves its share directory and optionally downloads one file.

pub mod core;
pub mod error;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod serve;
pub mod transfer;

pub use crate::core::{
    hash_file_name, random_node_id, xor_distance, ContentHash, Distance, NodeId, ProviderStore,
    RoutingTable, LOOKUP_WIDTH, PROVIDER_TTL, ROUTING_TABLE_SIZE,
};
pub use crate::error::{DecodeError, DhtError, ServeError, TransferError};
pub use crate::node::{DhtNode, ROUTING_REFRESH_INTERVAL};
pub use crate::peer::{load_bootstrap, Peer, PeerConfig, DEFAULT_BOOTSTRAP_FILE};
pub use crate::protocol::{ChunkReply, ChunkRequest, DhtMessage, NodeRecord};
pub use crate::serve::{ChunkServer, CHUNK_SIZE};
pub use crate::transfer::{download, CHUNK_FETCH_ATTEMPTS, FETCH_BATCH_SIZE, SIZE_QUERY_ATTEMPTS};
