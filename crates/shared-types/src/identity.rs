//! Node identity and wallet address derivation.
//!
//! `NodeId` is the 256-bit key-space identifier used by the routing table
//! and the search driver. It is expected to be derived from a peer's
//! wallet/public key by the host application; this crate only fixes the
//! shape and the `Wallet::address_of` contract used to compute `ItemKey`.

use crate::hash::{Hash, Hasher};

/// 256-bit identifier placing a peer (or a key) in the DHT ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for NodeId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Identity/address derivation for a `NodeId`.
pub trait Wallet: Send + Sync {
    fn address_of(&self, id: &NodeId) -> [u8; 20];
}

/// Default wallet: truncates the hash of the node id to 20 bytes, the same
/// way an Ethereum-style account address is derived from a public key hash.
pub struct HashedWallet<H: Hasher> {
    hasher: H,
}

impl<H: Hasher> HashedWallet<H> {
    pub fn new(hasher: H) -> Self {
        Self { hasher }
    }
}

impl<H: Hasher> Wallet for HashedWallet<H> {
    fn address_of(&self, id: &NodeId) -> [u8; 20] {
        let digest: Hash = self.hasher.hash(id.as_bytes());
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&digest[12..32]);
        addr
    }
}
