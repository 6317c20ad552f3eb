//! The Merkle node shapes and their canonical `Term` encoding.
//!
//! Two distinct hashes are derived from a node: its *storage identity*
//! (`StoreKey = H(serialise(node))`, used for content-addressed
//! deduplication) and its *hash-vector* (the per-slot authentication
//! signature folded into `root_hash`). They share the same `Serializer`
//! but encode different shapes -- see `tree.rs` for the hash-vector math.

use shared_types::{Hash, Serializer, Term};

use super::entities::{Key, Prefix, Value, LEAF_SIZE};

pub type StoreKey = Hash;

/// A child pointer: either a node still owned in memory by the current
/// mutation, or a frozen, content-addressed node already on disk.
#[derive(Debug, Clone)]
pub enum Child {
    Inline(Box<TreeNode>),
    Stored(StoreKey),
}

/// The subtree's per-slot Merkle signature plus the live key count beneath
/// the node, recomputed whenever `cache` goes dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashVector {
    pub slots: [Hash; LEAF_SIZE],
    pub count: u64,
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    Leaf {
        prefix: Prefix,
        bucket: Vec<(Key, Value)>,
        cache: Option<HashVector>,
    },
    Inner {
        prefix: Prefix,
        left: Child,
        right: Child,
        cache: Option<HashVector>,
    },
}

impl TreeNode {
    pub fn empty_leaf(prefix: Prefix) -> Self {
        TreeNode::Leaf {
            prefix,
            bucket: Vec::new(),
            cache: None,
        }
    }

    pub fn prefix(&self) -> &Prefix {
        match self {
            TreeNode::Leaf { prefix, .. } => prefix,
            TreeNode::Inner { prefix, .. } => prefix,
        }
    }

    pub fn cache(&self) -> Option<&HashVector> {
        match self {
            TreeNode::Leaf { cache, .. } => cache.as_ref(),
            TreeNode::Inner { cache, .. } => cache.as_ref(),
        }
    }
}

fn key_term(key: &Key) -> Term {
    match key {
        Key::Bytes(b) => Term::list(vec![Term::Int(0), Term::bytes(b.clone())]),
        Key::Int(n) => Term::list(vec![Term::Int(1), Term::Int(*n)]),
    }
}

fn term_to_key(term: &Term) -> Option<Key> {
    match term {
        Term::List(items) if items.len() == 2 => match (&items[0], &items[1]) {
            (Term::Int(0), Term::Bytes(b)) => Some(Key::Bytes(b.clone())),
            (Term::Int(1), Term::Int(n)) => Some(Key::Int(*n)),
            _ => None,
        },
        _ => None,
    }
}

fn value_term(value: &Value) -> Term {
    match value {
        Value::Bytes(b) => Term::list(vec![Term::Int(0), Term::bytes(b.clone())]),
        Value::Int(n) => Term::list(vec![Term::Int(1), Term::Int(*n)]),
    }
}

fn term_to_value(term: &Term) -> Option<Value> {
    match term {
        Term::List(items) if items.len() == 2 => match (&items[0], &items[1]) {
            (Term::Int(0), Term::Bytes(b)) => Some(Value::Bytes(b.clone())),
            (Term::Int(1), Term::Int(n)) => Some(Value::Int(*n)),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn prefix_term(prefix: &Prefix) -> Term {
    let mut packed = vec![0u8; prefix.0.len().div_ceil(8)];
    for (i, &bit) in prefix.0.iter().enumerate() {
        if bit {
            packed[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    Term::list(vec![Term::Int(prefix.0.len() as u64), Term::bytes(packed)])
}

fn term_to_prefix(term: &Term) -> Option<Prefix> {
    match term {
        Term::List(items) if items.len() == 2 => match (&items[0], &items[1]) {
            (Term::Int(len), Term::Bytes(packed)) => {
                let len = *len as usize;
                let mut bits = Vec::with_capacity(len);
                for i in 0..len {
                    let byte = *packed.get(i / 8)?;
                    bits.push((byte >> (7 - (i % 8))) & 1 == 1);
                }
                Some(Prefix(bits))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Sorted `(key, value)` term list: the serialiser must never depend on
/// insertion order, only on logical content.
pub fn entries_term(entries: &[(Key, Value)]) -> Term {
    let mut canon: Vec<_> = entries
        .iter()
        .map(|(k, v)| (k.canon(), key_term(k), value_term(v)))
        .collect();
    canon.sort_by(|a, b| a.0.cmp(&b.0));
    Term::list(
        canon
            .into_iter()
            .map(|(_, kt, vt)| Term::list(vec![kt, vt]))
            .collect::<Vec<_>>(),
    )
}

fn entries_from_term(term: &Term) -> Option<Vec<(Key, Value)>> {
    match term {
        Term::List(items) => items
            .iter()
            .map(|item| match item {
                Term::List(pair) if pair.len() == 2 => {
                    Some((term_to_key(&pair[0])?, term_to_value(&pair[1])?))
                }
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

const TAG_LEAF: u64 = 0;
const TAG_INNER: u64 = 1;

/// Storage-identity term: the whole node, used to derive `StoreKey` and
/// to round-trip through `restore`. Distinct from the hash-vector groups
/// used for Merkle authentication (see `tree.rs::leaf_group_term`).
pub fn node_term(node: &TreeNode) -> Term {
    match node {
        TreeNode::Leaf { prefix, bucket, .. } => Term::list(vec![
            Term::Int(TAG_LEAF),
            prefix_term(prefix),
            entries_term(bucket),
        ]),
        TreeNode::Inner {
            prefix,
            left,
            right,
            ..
        } => Term::list(vec![
            Term::Int(TAG_INNER),
            prefix_term(prefix),
            Term::bytes(store_key_of(left).to_vec()),
            Term::bytes(store_key_of(right).to_vec()),
        ]),
    }
}

/// Panics if called on an unfrozen `Child::Inline` -- callers must flush
/// children to the store before serialising the parent.
fn store_key_of(child: &Child) -> StoreKey {
    match child {
        Child::Stored(k) => *k,
        Child::Inline(_) => panic!("node_term called with an unflushed inline child"),
    }
}

pub fn node_from_term(term: &Term) -> Option<TreeNode> {
    match term {
        Term::List(items) if items.len() == 3 && items[0] == Term::Int(TAG_LEAF) => {
            let prefix = term_to_prefix(&items[1])?;
            let bucket = entries_from_term(&items[2])?;
            Some(TreeNode::Leaf {
                prefix,
                bucket,
                cache: None,
            })
        }
        Term::List(items) if items.len() == 4 && items[0] == Term::Int(TAG_INNER) => {
            let prefix = term_to_prefix(&items[1])?;
            let left = as_store_key(&items[2])?;
            let right = as_store_key(&items[3])?;
            Some(TreeNode::Inner {
                prefix,
                left: Child::Stored(left),
                right: Child::Stored(right),
                cache: None,
            })
        }
        _ => None,
    }
}

fn as_store_key(term: &Term) -> Option<StoreKey> {
    match term {
        Term::Bytes(b) if b.len() == 32 => {
            let mut key = [0u8; 32];
            key.copy_from_slice(b);
            Some(key)
        }
        _ => None,
    }
}

pub fn serialise_node(serializer: &dyn Serializer, node: &TreeNode) -> Vec<u8> {
    serializer.encode(&node_term(node))
}
