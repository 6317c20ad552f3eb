//! # shared-types
//!
//! Cross-cutting primitives shared by the state-trie, peer-routing, and
//! dht-search crates: the `Hash`/`Hasher` collaborator, the canonical
//! `Serializer`, the node identity/`Wallet` contract, and the `Clock`
//! abstraction. Single source of truth for these types, mirroring how the
//! rest of the node keeps shared domain vocabulary in one place.

pub mod clock;
pub mod encoding;
pub mod hash;
pub mod identity;

pub use clock::{Clock, FixedClock, SystemClock};
pub use encoding::{CanonicalEncoder, DecodeError, Serializer, Term};
pub use hash::{Hash, Hasher, Keccak256Hasher};
pub use identity::{HashedWallet, NodeId, Wallet};
