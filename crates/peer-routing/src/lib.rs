//! # peer-routing
//!
//! The K-Bucket Routing Table (KBRT): a bucket-splitting trie over a
//! 256-bit ring identifier space, holding up to `K` peers per leaf with
//! a permanent "self" anchor.
//!
//! Domain invariants:
//!
//! | id | invariant |
//! |----|-----------|
//! | INVARIANT-6 | `nearest_n(q, n)` returns `min(n, live_peer_count)` globally-nearest live peers |
//! | INVARIANT-7 | a non-self bucket never exceeds `K` entries; the self bucket always exists and holds self |
//!
//! Pure in-memory and single-writer: no operation here can fail, and
//! concurrent mutation must be serialised by the caller.

pub mod domain;

pub use domain::{
    derive_item_key, distance, ItemKey, KBuckets, KTree, PeerItem, PeerObject, ServerDescriptor, K,
};
