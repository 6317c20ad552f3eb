//! Inclusion proofs: generated against a live store by `tree.rs`, but
//! verified here with nothing but `H`, the serialiser, and the bytes on
//! the wire -- no store access required.

use shared_types::{Hash, Hasher, Serializer, Term};

use super::entities::{slot_of, Key, Prefix, Value, LEAF_SIZE};
use super::node::entries_term;

/// One `Inner` level crossed while descending to the key's leaf: the
/// peer hash at the key's slot index, and which side the key went.
#[derive(Debug, Clone)]
pub struct InnerStep {
    pub sibling_slot_hash: Hash,
    pub went_right: bool,
}

/// A verifiable inclusion (or exclusion) proof for a single key.
#[derive(Debug, Clone)]
pub struct Proof {
    pub key: Key,
    pub steps: Vec<InnerStep>,
    pub leaf_prefix: Prefix,
    pub leaf_group: Vec<(Key, Value)>,
    /// The root hash-vector's other 15 slots, captured so the verifier
    /// can fold the reconstructed slot back into a literal `root_hash`.
    pub root_other_slots: [Hash; LEAF_SIZE],
    pub root_count: u64,
}

fn group_hash(hasher: &dyn Hasher, serializer: &dyn Serializer, slot: usize, prefix: &Prefix, entries: &[(Key, Value)]) -> Hash {
    let term = Term::list(vec![
        Term::Int(slot as u64),
        super::node::prefix_term(prefix),
        entries_term(entries),
    ]);
    hasher.hash(&serializer.encode(&term))
}

fn combine(hasher: &dyn Hasher, serializer: &dyn Serializer, left: Hash, right: Hash) -> Hash {
    let term = Term::list(vec![Term::bytes(left.to_vec()), Term::bytes(right.to_vec())]);
    hasher.hash(&serializer.encode(&term))
}

/// Reconstructs `root_hash` from the proof and returns the value found at
/// the terminal leaf, or `None` if the key is absent from that leaf's
/// slot group. Returns `None` on a hash mismatch as well as on a genuine
/// absence -- soundness means a forged proof can never produce `Some`.
pub fn verify(
    proof: &Proof,
    expected_root_hash: &Hash,
    key: &Key,
    hasher: &dyn Hasher,
    serializer: &dyn Serializer,
) -> Option<Value> {
    let key_hash = hasher.hash(&key.canon());
    let slot = slot_of(&key_hash);

    let mut current = group_hash(hasher, serializer, slot, &proof.leaf_prefix, &proof.leaf_group);
    for step in proof.steps.iter().rev() {
        current = if step.went_right {
            combine(hasher, serializer, step.sibling_slot_hash, current)
        } else {
            combine(hasher, serializer, current, step.sibling_slot_hash)
        };
    }

    let mut slots = proof.root_other_slots;
    slots[slot] = current;
    let hv_term = Term::list(vec![
        Term::list(slots.iter().map(|h| Term::bytes(h.to_vec())).collect::<Vec<_>>()),
        Term::Int(proof.root_count),
    ]);
    let reconstructed = hasher.hash(&serializer.encode(&hv_term));
    if &reconstructed != expected_root_hash {
        return None;
    }

    proof
        .leaf_group
        .iter()
        .find(|(k, _)| k.canon() == key.canon())
        .map(|(_, v)| v.clone())
}
