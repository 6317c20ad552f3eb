//! KBRT entities: routing-table items and the bucket-splitting trie.

use shared_types::{Hash, Hasher, NodeId, Wallet};

/// `K`: per-leaf routing-bucket capacity. Non-negotiable for network
/// compatibility.
pub const K: usize = 20;

/// `H(address_of(NodeId))`: the 256-bit coordinate used both to route an
/// item through the trie and to measure ring distance.
pub type ItemKey = Hash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerObject {
    ServerDescriptor(ServerDescriptor),
    SelfMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub host: String,
    pub port: u16,
}

/// A routing-table entry. `last_seen` in the future marks a temporarily
/// disabled peer (a penalty applied after a failed contact).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerItem {
    pub id: NodeId,
    pub last_seen: i64,
    pub object: PeerObject,
    pub retries: u32,
}

impl PeerItem {
    pub fn is_disabled(&self, now: i64) -> bool {
        self.last_seen > now
    }
}

/// `ItemKey = H(address_of(NodeId))`, the routing/ring coordinate shared
/// by KBRT and IPS.
pub fn derive_item_key(wallet: &dyn Wallet, hasher: &dyn Hasher, id: &NodeId) -> ItemKey {
    hasher.hash(&wallet.address_of(id))
}

/// Bit at `index` (MSB-first, 0-indexed) of a 32-byte key.
pub fn bit_at(key: &ItemKey, index: usize) -> bool {
    let byte = key[index / 8];
    (byte >> (7 - (index % 8))) & 1 == 1
}

/// The bucket-splitting prefix trie. Unlike HBMM's content-addressed
/// tree, `KTree` is a pure in-memory structure: no node ever leaves the
/// process, so there is no store, no hash-vector, and no serialisation.
#[derive(Debug, Clone)]
pub enum KTree {
    Leaf {
        prefix: Vec<bool>,
        items: Vec<(ItemKey, PeerItem)>,
    },
    Inner {
        prefix: Vec<bool>,
        zero: Box<KTree>,
        one: Box<KTree>,
    },
}

impl KTree {
    pub fn prefix(&self) -> &[bool] {
        match self {
            KTree::Leaf { prefix, .. } => prefix,
            KTree::Inner { prefix, .. } => prefix,
        }
    }
}
