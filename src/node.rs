//! The DHT node: one UDP socket shared by a listener task, a routing
//! refresher task, and the RPC client side.
//!
//! The wire protocol has no request identifiers, so replies are correlated by
//! peer address: an RPC registers a oneshot waiter under the remote address,
//! sends its datagram from the node's own socket (so the peer learns our real
//! DHT endpoint), and awaits the waiter with a timeout. The listener merges
//! every inbound `NODES`/`PEERS` into the shared tables before completing the
//! matching waiter, which lets lookups deterministically await their own
//! replies instead of polling shared state on a timer.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::{
    hash_file_name, random_node_id, ContentHash, NodeId, ProviderStore, RoutingTable, LOOKUP_WIDTH,
};
use crate::error::DhtError;
use crate::protocol::{DhtMessage, NodeRecord};

/// How often the refresher pings a random routing-table entry.
pub const ROUTING_REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

/// How long an RPC waits for its reply before giving up.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// DHT datagrams are small; 2 KiB covers every message kind comfortably.
const MAX_DATAGRAM: usize = 2048;

/// Upper bound on endpoints in one `PEERS` reply. 64 maximal `ip:port`
/// fields stay well under [`MAX_DATAGRAM`], so the reply is never truncated
/// at the receiver.
const PEERS_REPLY_LIMIT: usize = 64;

/// A running DHT node.
///
/// Construct with [`DhtNode::bind`], then call [`DhtNode::start`] to spawn
/// the listener and refresher tasks before issuing any RPCs. The routing
/// table and provider store are each guarded by a mutex and shared between
/// the listener, the refresher, and lookup callers.
pub struct DhtNode {
    node_id: NodeId,
    addr: SocketAddr,
    socket: UdpSocket,
    routing: Mutex<RoutingTable>,
    providers: Mutex<ProviderStore>,
    pending: Mutex<HashMap<SocketAddr, oneshot::Sender<DhtMessage>>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    refresh_interval: Duration,
}

impl DhtNode {
    /// Bind a node with a fresh random identity on the given address.
    pub async fn bind(addr: SocketAddr) -> Result<Arc<Self>, DhtError> {
        Self::bind_with_interval(addr, ROUTING_REFRESH_INTERVAL).await
    }

    /// Bind with a custom refresh interval. Tests shrink the interval to
    /// observe maintenance traffic without waiting half an hour.
    pub async fn bind_with_interval(
        addr: SocketAddr,
        refresh_interval: Duration,
    ) -> Result<Arc<Self>, DhtError> {
        let socket = UdpSocket::bind(addr).await?;
        let addr = socket.local_addr()?;
        let node_id = random_node_id();
        info!("node {} listening at {addr}", hex::encode(&node_id[..4]));
        Ok(Arc::new(Self {
            node_id,
            addr,
            socket,
            routing: Mutex::new(RoutingTable::new(node_id, addr)),
            providers: Mutex::new(ProviderStore::default()),
            pending: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            refresh_interval,
        }))
    }

    /// This node's identifier.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The bound DHT endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Spawn the listener and refresher tasks.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(self.clone().listen()));
        tasks.push(tokio::spawn(self.clone().refresh()));
    }

    /// Best-effort stop: flip the running flag and abort both tasks. An
    /// in-flight receive may still complete before the flag is observed.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    /// Ids currently held in the routing table.
    pub async fn known_nodes(&self) -> Vec<NodeId> {
        self.routing.lock().await.node_ids()
    }

    // ─── Joining and maintenance ─────────────────────────────────────────────

    /// Seed the routing table from well-known addresses: ping each, then ask
    /// it for the nodes closest to our own id. Unreachable addresses are
    /// logged and skipped.
    pub async fn bootstrap(&self, addrs: &[SocketAddr]) {
        for &addr in addrs {
            if let Err(err) = self.ping(addr).await {
                warn!("bootstrap node {addr} unreachable: {err}");
                continue;
            }
            if let Err(err) = self.find_node(self.node_id, addr).await {
                warn!("bootstrap FIND_NODE to {addr} failed: {err}");
            }
        }
        let known = self.routing.lock().await.len();
        info!("bootstrap complete, {known} nodes in routing table");
    }

    async fn listen(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    warn!("listener receive failed: {err}");
                    continue;
                }
            };
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            match DhtMessage::decode(&buf[..len]) {
                Ok(msg) => self.handle_message(msg, from).await,
                Err(err) => debug!("dropping malformed datagram from {from}: {err}"),
            }
        }
    }

    /// Periodically refresh a uniformly random routing entry by sending it a
    /// `FIND_NODE` targeting its own id. Fire-and-forget: the `NODES` reply
    /// is merged by the listener like any other, refreshing the entry and
    /// possibly discovering its neighbors.
    async fn refresh(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let entry = self.routing.lock().await.random_entry();
            let Some(entry) = entry else {
                continue;
            };
            debug!("refreshing routing entry {}", hex::encode(&entry.node_id[..4]));
            self.send(
                DhtMessage::FindNode {
                    target: entry.node_id,
                    sender: self.node_id,
                },
                entry.addr,
            )
            .await;
        }
    }

    // ─── Dispatcher ──────────────────────────────────────────────────────────

    async fn handle_message(&self, msg: DhtMessage, from: SocketAddr) {
        match msg {
            DhtMessage::Ping => {
                self.send(DhtMessage::Pong, from).await;
            }
            DhtMessage::Pong => {
                self.complete(from, DhtMessage::Pong).await;
            }
            DhtMessage::FindNode { target, sender } => {
                // Discovery piggybacks on every query: the sender is merged
                // before we answer.
                let closest = {
                    let mut routing = self.routing.lock().await;
                    routing.update(sender, from);
                    routing.closest(&target, LOOKUP_WIDTH)
                };
                let records = closest
                    .into_iter()
                    .map(|(id, addr)| NodeRecord { id, addr })
                    .collect();
                self.send(DhtMessage::Nodes(records), from).await;
            }
            DhtMessage::Nodes(records) => {
                {
                    let mut routing = self.routing.lock().await;
                    for record in &records {
                        routing.update(record.id, record.addr);
                    }
                }
                self.complete(from, DhtMessage::Nodes(records)).await;
            }
            DhtMessage::Store { hash, provider } => {
                self.providers.lock().await.store_peer(hash, provider);
            }
            DhtMessage::FindPeers { hash, sender } => {
                self.routing.lock().await.update(sender, from);
                let mut known = self.providers.lock().await.get_peers(&hash);
                known.truncate(PEERS_REPLY_LIMIT);
                let reply = if known.is_empty() {
                    // Closest-node fallback so the asker can keep iterating.
                    let closest = self.routing.lock().await.closest(&hash, LOOKUP_WIDTH);
                    DhtMessage::Nodes(
                        closest
                            .into_iter()
                            .map(|(id, addr)| NodeRecord { id, addr })
                            .collect(),
                    )
                } else {
                    DhtMessage::Peers {
                        hash,
                        providers: known,
                    }
                };
                self.send(reply, from).await;
            }
            DhtMessage::Peers { hash, providers } => {
                {
                    let mut store = self.providers.lock().await;
                    for provider in &providers {
                        store.store_peer(hash, *provider);
                    }
                }
                self.complete(from, DhtMessage::Peers { hash, providers })
                    .await;
            }
        }
    }

    async fn send(&self, msg: DhtMessage, to: SocketAddr) {
        if let Err(err) = self.socket.send_to(&msg.encode(), to).await {
            if self.running.load(Ordering::Relaxed) {
                warn!("send to {to} failed: {err}");
            }
        }
    }

    /// Complete the pending RPC waiting on `from`, if any. Unsolicited
    /// replies have already been merged and are simply not delivered further.
    async fn complete(&self, from: SocketAddr, msg: DhtMessage) {
        if let Some(waiter) = self.pending.lock().await.remove(&from) {
            let _ = waiter.send(msg);
        }
    }

    // ─── RPC client side ─────────────────────────────────────────────────────

    async fn request(&self, to: SocketAddr, msg: DhtMessage) -> Result<DhtMessage, DhtError> {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().await.insert(to, tx).is_some() {
            debug!("replacing pending request to {to}");
        }
        if let Err(err) = self.socket.send_to(&msg.encode(), to).await {
            // Nothing was sent, so no reply will ever complete this waiter.
            self.pending.lock().await.remove(&to);
            return Err(err.into());
        }
        match timeout(RPC_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(DhtError::Superseded(to)),
            Err(_) => {
                self.pending.lock().await.remove(&to);
                Err(DhtError::Timeout(to))
            }
        }
    }

    /// Check liveness of a peer.
    pub async fn ping(&self, to: SocketAddr) -> Result<(), DhtError> {
        self.request(to, DhtMessage::Ping).await.map(|_| ())
    }

    /// Ask `to` for the nodes it knows closest to `target`. The reply is
    /// merged into the routing table before this returns.
    pub async fn find_node(&self, target: NodeId, to: SocketAddr) -> Result<(), DhtError> {
        self.request(
            to,
            DhtMessage::FindNode {
                target,
                sender: self.node_id,
            },
        )
        .await
        .map(|_| ())
    }

    async fn query_providers(&self, hash: ContentHash, to: SocketAddr) -> Result<(), DhtError> {
        self.request(
            to,
            DhtMessage::FindPeers {
                hash,
                sender: self.node_id,
            },
        )
        .await
        .map(|_| ())
    }

    // ─── Lookup engine ───────────────────────────────────────────────────────

    /// Iteratively converge on the nodes closest to `target`.
    ///
    /// Each round takes the current closest-[`LOOKUP_WIDTH`] set, queries
    /// every member not yet contacted in this call (self is a candidate but
    /// is never queried), and stops at the fixed point where the set contains
    /// no new nodes. Replies are merged by the listener before the awaiting
    /// RPC returns, so the next round sees them. Failed queries are logged
    /// and count as contacted.
    async fn converge(&self, target: ContentHash, for_providers: bool) -> Vec<(NodeId, SocketAddr)> {
        let mut contacted: HashSet<NodeId> = HashSet::new();
        contacted.insert(self.node_id);
        loop {
            let closest = self.routing.lock().await.closest(&target, LOOKUP_WIDTH);
            let wave: Vec<(NodeId, SocketAddr)> = closest
                .iter()
                .filter(|(id, _)| !contacted.contains(id))
                .cloned()
                .collect();
            if wave.is_empty() {
                return closest;
            }
            for (id, _) in &wave {
                contacted.insert(*id);
            }
            let queries = wave.iter().map(|(_, addr)| async move {
                let outcome = if for_providers {
                    self.query_providers(target, *addr).await
                } else {
                    self.find_node(target, *addr).await
                };
                if let Err(err) = outcome {
                    debug!("lookup query failed: {err}");
                }
            });
            join_all(queries).await;
        }
    }

    /// Find provider endpoints for a named file.
    ///
    /// Hashes the name, converges on the closest nodes while collecting
    /// `PEERS` replies, and returns whatever the provider store then holds
    /// for the hash. May be empty; the caller decides whether that is fatal.
    pub async fn find_peers(&self, file_name: &str) -> Vec<SocketAddr> {
        let hash = hash_file_name(file_name);
        self.converge(hash, true).await;
        self.providers.lock().await.get_peers(&hash)
    }

    /// Announce `endpoint` as a provider of the named file.
    ///
    /// Converges on the nodes closest to the hash, then unconditionally sends
    /// `STORE` to the final closest set. If we are in that set ourselves the
    /// record is stored locally rather than routed over the wire.
    pub async fn announce(&self, file_name: &str, endpoint: SocketAddr) {
        let hash = hash_file_name(file_name);
        let closest = self.converge(hash, false).await;
        for (id, addr) in closest {
            if id == self.node_id {
                self.providers.lock().await.store_peer(hash, endpoint);
            } else {
                self.send(
                    DhtMessage::Store {
                        hash,
                        provider: endpoint,
                    },
                    addr,
                )
                .await;
            }
        }
    }
}
