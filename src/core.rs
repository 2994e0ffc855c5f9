//! Transport-agnostic DHT state: identity, XOR distance, the bounded routing
//! table, and the TTL-expiring provider store.
//!
//! Everything in this module is synchronous and lock-free; callers wrap the
//! tables in a mutex and share them between the listener and refresher tasks
//! (see [`crate::node::DhtNode`]).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;
use sha1::{Digest, Sha1};

/// A 160-bit node identifier.
///
/// Generated once per process from a random seed and never persisted; a
/// restarted node joins the network under a fresh identity.
pub type NodeId = [u8; 20];

/// A 160-bit content hash, derived from a file name with SHA-1.
///
/// Node ids and content hashes share one identifier space so that providers
/// of a file cluster around the nodes whose ids are closest to its hash.
pub type ContentHash = [u8; 20];

/// Maximum number of entries in a routing table.
pub const ROUTING_TABLE_SIZE: usize = 10;

/// Number of closest nodes returned by lookups and `NODES` replies.
pub const LOOKUP_WIDTH: usize = 3;

/// Provider records older than this are purged on the next read or write of
/// their hash entry.
pub const PROVIDER_TTL: Duration = Duration::from_secs(1800);

/// Compute a 20-byte SHA-1 digest of the input.
fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive a fresh random node identity.
///
/// The id is the SHA-1 digest of a non-deterministic 64-bit seed, so ids are
/// uniformly spread over the identifier space but carry no proof of anything.
pub fn random_node_id() -> NodeId {
    sha1_digest(&rand::random::<u64>().to_be_bytes())
}

/// Hash a file name into the content hash used as its DHT key.
pub fn hash_file_name(name: &str) -> ContentHash {
    sha1_digest(name.as_bytes())
}

/// XOR distance between two identifiers.
///
/// The result compares as the big-endian integer value of the byte-wise XOR:
/// lexicographic comparison from the most significant byte is equivalent and
/// is what [`Distance`]'s derived `Ord` provides.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> Distance {
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = a[i] ^ b[i];
    }
    Distance(out)
}

/// An XOR distance, ordered most-significant byte first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; 20]);

impl Distance {
    /// The zero distance, i.e. `xor_distance(x, x)`.
    pub const ZERO: Distance = Distance([0u8; 20]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing Table
// ─────────────────────────────────────────────────────────────────────────────

/// A known peer in the routing table.
#[derive(Clone, Debug)]
pub struct RouteEntry {
    /// The peer's identifier.
    pub node_id: NodeId,
    /// The peer's DHT endpoint.
    pub addr: SocketAddr,
    /// When the peer was last heard from.
    pub last_seen: Instant,
    /// Precomputed XOR distance from the owning node's id.
    pub distance: Distance,
}

/// Bounded map of known peers with oldest-contact eviction.
///
/// The table holds at most [`ROUTING_TABLE_SIZE`] entries and never contains
/// the owning node's own id. When a full table sees a new peer, the entry
/// with the smallest `last_seen` is evicted first.
#[derive(Debug)]
pub struct RoutingTable {
    self_id: NodeId,
    self_addr: SocketAddr,
    entries: HashMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    /// Create an empty table owned by the node with the given id and address.
    pub fn new(self_id: NodeId, self_addr: SocketAddr) -> Self {
        Self {
            self_id,
            self_addr,
            entries: HashMap::new(),
        }
    }

    /// Record contact with a peer.
    ///
    /// A known id only has its `last_seen` refreshed; the stored address is
    /// treated as authoritative even if this contact came from a different
    /// endpoint (the reference behavior, kept deliberately). A new peer is
    /// inserted, evicting the oldest entry if the table is full. Contact with
    /// our own id is ignored.
    pub fn update(&mut self, node_id: NodeId, addr: SocketAddr) {
        self.update_at(node_id, addr, Instant::now());
    }

    fn update_at(&mut self, node_id: NodeId, addr: SocketAddr, now: Instant) {
        if node_id == self.self_id {
            return;
        }
        if let Some(entry) = self.entries.get_mut(&node_id) {
            entry.last_seen = now;
            return;
        }
        if self.entries.len() >= ROUTING_TABLE_SIZE {
            let oldest = self
                .entries
                .values()
                .min_by_key(|e| e.last_seen)
                .map(|e| e.node_id);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            node_id,
            RouteEntry {
                node_id,
                addr,
                last_seen: now,
                distance: xor_distance(&self.self_id, &node_id),
            },
        );
    }

    /// The `count` known nodes closest to `target`, self included as a
    /// candidate, sorted by ascending XOR distance.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<(NodeId, SocketAddr)> {
        let mut all: Vec<(NodeId, SocketAddr)> = self
            .entries
            .values()
            .map(|e| (e.node_id, e.addr))
            .collect();
        all.push((self.self_id, self.self_addr));
        all.sort_by_key(|(id, _)| xor_distance(id, target));
        all.truncate(count);
        all
    }

    /// A uniformly random entry, if the table is non-empty.
    pub fn random_entry(&self) -> Option<RouteEntry> {
        self.entries
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Number of known peers (self excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no peers are known yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all known peers, in no particular order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.entries.keys().copied().collect()
    }

    /// True if the table holds an entry for `id`.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// The stored entry for `id`, if present.
    pub fn entry(&self, id: &NodeId) -> Option<&RouteEntry> {
        self.entries.get(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Store
// ─────────────────────────────────────────────────────────────────────────────

/// A peer claiming to hold the content for some hash.
#[derive(Clone, Debug)]
struct Provider {
    addr: SocketAddr,
    last_seen: Instant,
}

/// Mapping from content hash to the set of endpoints that announced it.
///
/// Endpoints are unique per hash; re-announcing refreshes `last_seen` in
/// place. Records older than the TTL are purged lazily whenever the hash
/// entry is next read or written, and an entry whose set empties is removed.
#[derive(Debug)]
pub struct ProviderStore {
    ttl: Duration,
    providers: HashMap<ContentHash, Vec<Provider>>,
}

impl Default for ProviderStore {
    fn default() -> Self {
        Self::with_ttl(PROVIDER_TTL)
    }
}

impl ProviderStore {
    /// Create a store with a custom TTL. Tests use short TTLs; production
    /// uses [`Default`] with [`PROVIDER_TTL`].
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            providers: HashMap::new(),
        }
    }

    /// Record that `addr` provides the content for `hash`.
    pub fn store_peer(&mut self, hash: ContentHash, addr: SocketAddr) {
        let now = Instant::now();
        let ttl = self.ttl;
        let entry = self.providers.entry(hash).or_default();
        entry.retain(|p| now.duration_since(p.last_seen) < ttl);
        if let Some(existing) = entry.iter_mut().find(|p| p.addr == addr) {
            existing.last_seen = now;
        } else {
            entry.push(Provider {
                addr,
                last_seen: now,
            });
        }
    }

    /// All live provider endpoints for `hash`, purging expired ones.
    pub fn get_peers(&mut self, hash: &ContentHash) -> Vec<SocketAddr> {
        let now = Instant::now();
        let ttl = self.ttl;
        let Some(entry) = self.providers.get_mut(hash) else {
            return Vec::new();
        };
        entry.retain(|p| now.duration_since(p.last_seen) < ttl);
        if entry.is_empty() {
            self.providers.remove(hash);
            return Vec::new();
        }
        entry.iter().map(|p| p.addr).collect()
    }

    /// Number of hashes with at least one recorded provider.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// True if no providers are recorded.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(byte: u8) -> NodeId {
        let mut id = [0u8; 20];
        id[0] = byte;
        id
    }

    fn make_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn distance_is_zero_on_self_and_symmetric() {
        let a = random_node_id();
        let b = random_node_id();
        assert_eq!(xor_distance(&a, &a), Distance::ZERO);
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn distance_orders_by_most_significant_byte() {
        let base = make_id(0x00);
        let near = make_id(0x01);
        let mut far = [0u8; 20];
        far[1] = 0xFF; // differs only in a less significant byte than 0x02
        let very_far = make_id(0x02);
        assert!(xor_distance(&base, &near) < xor_distance(&base, &far));
        assert!(xor_distance(&base, &far) < xor_distance(&base, &very_far));
    }

    #[test]
    fn hash_file_name_is_deterministic() {
        assert_eq!(hash_file_name("x.bin"), hash_file_name("x.bin"));
        assert_ne!(hash_file_name("x.bin"), hash_file_name("y.bin"));
    }

    #[test]
    fn routing_table_ignores_own_id() {
        let self_id = make_id(0xAA);
        let mut table = RoutingTable::new(self_id, make_addr(7000));
        table.update(self_id, make_addr(7001));
        assert!(table.is_empty());
    }

    #[test]
    fn routing_table_never_exceeds_capacity() {
        let mut table = RoutingTable::new(make_id(0x00), make_addr(7000));
        for byte in 1..=20u8 {
            table.update(make_id(byte), make_addr(7000 + byte as u16));
            assert!(table.len() <= ROUTING_TABLE_SIZE);
        }
    }

    #[test]
    fn full_table_evicts_oldest_contact() {
        let mut table = RoutingTable::new(make_id(0x00), make_addr(7000));
        let base = Instant::now();
        for byte in 1..=10u8 {
            table.update_at(
                make_id(byte),
                make_addr(7000 + byte as u16),
                base + Duration::from_secs(byte as u64),
            );
        }
        // Entry 0x01 is the oldest contact; the 11th insertion must evict it.
        table.update_at(
            make_id(0x0B),
            make_addr(7011),
            base + Duration::from_secs(60),
        );
        assert_eq!(table.len(), ROUTING_TABLE_SIZE);
        assert!(!table.contains(&make_id(0x01)));
        assert!(table.contains(&make_id(0x0B)));
        assert!(table.contains(&make_id(0x02)));
    }

    #[test]
    fn refreshing_an_entry_protects_it_from_eviction() {
        let mut table = RoutingTable::new(make_id(0x00), make_addr(7000));
        let base = Instant::now();
        for byte in 1..=10u8 {
            table.update_at(
                make_id(byte),
                make_addr(7000 + byte as u16),
                base + Duration::from_secs(byte as u64),
            );
        }
        table.update_at(
            make_id(0x01),
            make_addr(7001),
            base + Duration::from_secs(30),
        );
        table.update_at(
            make_id(0x0B),
            make_addr(7011),
            base + Duration::from_secs(60),
        );
        // 0x02 became the oldest once 0x01 was refreshed.
        assert!(table.contains(&make_id(0x01)));
        assert!(!table.contains(&make_id(0x02)));
    }

    #[test]
    fn known_id_keeps_its_original_address() {
        let mut table = RoutingTable::new(make_id(0x00), make_addr(7000));
        table.update(make_id(0x01), make_addr(7001));
        table.update(make_id(0x01), make_addr(9999));
        let entry = table.entry(&make_id(0x01)).unwrap();
        assert_eq!(entry.addr, make_addr(7001));
    }

    #[test]
    fn closest_sorts_by_distance_and_includes_self() {
        let self_id = make_id(0x00);
        let mut table = RoutingTable::new(self_id, make_addr(7000));
        table.update(make_id(0x10), make_addr(7001));
        table.update(make_id(0x20), make_addr(7002));
        table.update(make_id(0x08), make_addr(7003));

        let target = make_id(0x18);
        let closest = table.closest(&target, 3);
        let first_bytes: Vec<u8> = closest.iter().map(|(id, _)| id[0]).collect();
        assert_eq!(first_bytes, vec![0x10, 0x08, 0x20]);

        // Self is always a candidate: with the target at our own id we win.
        let closest_to_self = table.closest(&self_id, 3);
        assert_eq!(closest_to_self[0].0, self_id);
        assert!(closest_to_self.len() <= 3);
    }

    #[test]
    fn provider_store_deduplicates_endpoints() {
        let mut store = ProviderStore::default();
        let hash = hash_file_name("x.bin");
        store.store_peer(hash, make_addr(6000));
        store.store_peer(hash, make_addr(6000));
        store.store_peer(hash, make_addr(6001));
        assert_eq!(store.get_peers(&hash).len(), 2);
    }

    #[test]
    fn provider_store_expires_old_records() {
        let mut store = ProviderStore::with_ttl(Duration::from_millis(30));
        let hash = hash_file_name("x.bin");
        store.store_peer(hash, make_addr(6000));
        std::thread::sleep(Duration::from_millis(40));
        assert!(store.get_peers(&hash).is_empty());
        // The hash entry itself is gone once its set emptied.
        assert!(store.is_empty());
    }

    #[test]
    fn reannouncing_refreshes_instead_of_expiring() {
        let mut store = ProviderStore::with_ttl(Duration::from_millis(60));
        let hash = hash_file_name("x.bin");
        store.store_peer(hash, make_addr(6000));
        std::thread::sleep(Duration::from_millis(40));
        store.store_peer(hash, make_addr(6000));
        std::thread::sleep(Duration::from_millis(40));
        // Refreshed 40ms ago, within the 60ms TTL.
        assert_eq!(store.get_peers(&hash), vec![make_addr(6000)]);
    }
}
