//! # state-trie
//!
//! The Hash-Backed Merkle Map (HBMM): an authenticated key/value tree
//! with snapshot semantics and structural sharing over a content-
//! addressed node store.
//!
//! Domain invariants:
//!
//! | id | invariant |
//! |----|-----------|
//! | INVARIANT-1 | every `Leaf` holds at most `LEAF_SIZE` entries; every `Inner`'s subtree holds more |
//! | INVARIANT-2 | a key's first `|prefix|` hash bits match the `prefix` of the node holding it |
//! | INVARIANT-3 | `cache` is `None` (dirty) or the authentic hash-vector of the node's current contents |
//! | INVARIANT-4 | a `StoreKey` child names a node whose `StoreKey` equals `H(serialise(node))` |
//! | INVARIANT-5 | writes to the store are idempotent: identical bytes under an existing key write nothing new |
//!
//! `domain` holds the tree algorithm and is free of I/O; `ports` names
//! the `NodeStore` collaborator; `adapters` carries the in-memory
//! reference implementation used by tests and light-weight embedders.

pub mod adapters;
pub mod domain;
pub mod ports;

pub use domain::{
    verify, Child, HashBackedMerkleMap, HashVector, InnerStep, Key, Prefix, Proof, Root,
    StateError, StoreKey, TreeNode, Value, LEAF_SIZE,
};
pub use ports::NodeStore;
