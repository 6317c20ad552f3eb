//! The HBMM engine: insert/delete/get plus the split, merge, and
//! hash-vector machinery that keeps a tree's root hash a pure function
//! of its live `(key, value)` set.

use std::sync::Arc;

use rayon::prelude::*;
use shared_types::{Hash, Hasher, Serializer, Term};

use super::entities::{bit_at, slot_of, Key, Prefix, Value, LEAF_SIZE};
use super::errors::StateError;
use super::node::{entries_term, node_from_term, node_term, prefix_term, Child, HashVector, StoreKey, TreeNode};
use super::proofs::{InnerStep, Proof};
use crate::ports::store::NodeStore;

/// Below this many entries, computing a leaf's 16 group hashes
/// sequentially outpaces the overhead of spinning up rayon's pool.
const PARALLEL_THRESHOLD: usize = 4;

/// A `StoreKey` naming a persisted root, plus the opaque options map the
/// core never interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root(pub StoreKey);

pub struct HashBackedMerkleMap {
    store: Arc<dyn NodeStore>,
    hasher: Arc<dyn Hasher>,
    serializer: Arc<dyn Serializer>,
}

impl HashBackedMerkleMap {
    pub fn new(store: Arc<dyn NodeStore>, hasher: Arc<dyn Hasher>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            store,
            hasher,
            serializer,
        }
    }

    /// Empty map; its store write is idempotent so repeated calls never
    /// duplicate the canonical empty-tree node.
    pub fn empty_root(&self) -> Result<Root, StateError> {
        let leaf = TreeNode::empty_leaf(Prefix::root());
        let (_, key, _) = self.freeze(leaf)?;
        Ok(Root(key))
    }

    pub fn restore(&self, key: StoreKey) -> Result<Root, StateError> {
        match self.store.read(&key)? {
            Some(_) => Ok(Root(key)),
            None => Err(StateError::NotFound(key)),
        }
    }

    pub fn get(&self, root: &Root, key: &Key) -> Result<Option<Value>, StateError> {
        let key_hash = self.hasher.hash(&key.canon());
        let mut node = self.resolve_root(root)?;
        loop {
            match node {
                TreeNode::Leaf { bucket, .. } => {
                    return Ok(bucket
                        .into_iter()
                        .find(|(k, _)| k.canon() == key.canon())
                        .map(|(_, v)| v));
                }
                TreeNode::Inner {
                    prefix,
                    left,
                    right,
                    ..
                } => {
                    let bit = bit_at(&key_hash, prefix.len());
                    node = self.resolve(if bit { &right } else { &left })?;
                }
            }
        }
    }

    pub fn member(&self, root: &Root, key: &Key) -> Result<bool, StateError> {
        Ok(self.get(root, key)?.is_some())
    }

    pub fn insert(&self, root: &Root, key: Key, value: Value) -> Result<Root, StateError> {
        let key_hash = self.hasher.hash(&key.canon());
        let node = self.resolve_root(root)?;
        let new_value = if value.is_zero() { None } else { Some(value) };
        let updated = self.upsert(node, &key, &key_hash, new_value)?;
        let (_, new_key, _) = self.freeze(updated)?;
        Ok(Root(new_key))
    }

    pub fn insert_many(&self, root: &Root, items: Vec<(Key, Value)>) -> Result<Root, StateError> {
        let mut current = *root;
        for (k, v) in items {
            current = self.insert(&current, k, v)?;
        }
        Ok(current)
    }

    pub fn delete(&self, root: &Root, key: &Key) -> Result<Root, StateError> {
        let key_hash = self.hasher.hash(&key.canon());
        let node = self.resolve_root(root)?;
        let updated = self.upsert(node, key, &key_hash, None)?;
        let (_, new_key, _) = self.freeze(updated)?;
        Ok(Root(new_key))
    }

    pub fn size(&self, root: &Root) -> Result<usize, StateError> {
        self.count_live_keys(&self.resolve_root(root)?)
    }

    pub fn bucket_count(&self, root: &Root) -> Result<usize, StateError> {
        self.count_leaves(&self.resolve_root(root)?)
    }

    pub fn to_list(&self, root: &Root) -> Result<Vec<(Key, Value)>, StateError> {
        self.collect_entries(&self.resolve_root(root)?)
    }

    pub fn root_hash(&self, root: &Root) -> Result<Hash, StateError> {
        let node = self.resolve_root(root)?;
        let (_, _, hv) = self.freeze(node)?;
        Ok(self.hasher.hash(&self.serializer.encode(&hash_vector_term(&hv))))
    }

    pub fn root_hashes(&self, root: &Root) -> Result<[Hash; LEAF_SIZE], StateError> {
        let node = self.resolve_root(root)?;
        let (_, _, hv) = self.freeze(node)?;
        Ok(hv.slots)
    }

    pub fn get_proof(&self, root: &Root, key: &Key) -> Result<Proof, StateError> {
        let key_hash = self.hasher.hash(&key.canon());
        let slot = slot_of(&key_hash);
        let root_node = self.resolve_root(root)?;
        let (_, _, root_hv) = self.freeze(root_node.clone())?;

        let mut node = root_node;
        let mut steps = Vec::new();
        loop {
            match node {
                TreeNode::Leaf { prefix, bucket, .. } => {
                    let group = bucket
                        .into_iter()
                        .filter(|(k, _)| slot_of(&self.hasher.hash(&k.canon())) == slot)
                        .collect();
                    return Ok(Proof {
                        key: key.clone(),
                        steps,
                        leaf_prefix: prefix,
                        leaf_group: group,
                        root_other_slots: root_hv.slots,
                        root_count: root_hv.count,
                    });
                }
                TreeNode::Inner {
                    prefix,
                    left,
                    right,
                    ..
                } => {
                    let bit = bit_at(&key_hash, prefix.len());
                    let (chosen, other) = if bit { (&right, &left) } else { (&left, &right) };
                    let other_node = self.resolve(other)?;
                    let (_, _, other_hv) = self.freeze(other_node)?;
                    steps.push(InnerStep {
                        sibling_slot_hash: other_hv.slots[slot],
                        went_right: bit,
                    });
                    node = self.resolve(chosen)?;
                }
            }
        }
    }

    // -- internals ---------------------------------------------------

    fn resolve_root(&self, root: &Root) -> Result<TreeNode, StateError> {
        self.resolve(&Child::Stored(root.0))
    }

    fn resolve(&self, child: &Child) -> Result<TreeNode, StateError> {
        match child {
            Child::Inline(node) => Ok((**node).clone()),
            Child::Stored(key) => {
                let bytes = self.store.read(key)?.ok_or_else(|| {
                    StateError::InvariantViolation(format!("missing store key {key:x?}"))
                })?;
                let term = self
                    .serializer
                    .decode(&bytes)
                    .map_err(|e| StateError::InvariantViolation(format!("node decode failed: {e:?}")))?;
                node_from_term(&term)
                    .ok_or_else(|| StateError::InvariantViolation("malformed node term".into()))
            }
        }
    }

    fn count_live_keys(&self, node: &TreeNode) -> Result<usize, StateError> {
        match node {
            TreeNode::Leaf { bucket, .. } => Ok(bucket.len()),
            TreeNode::Inner { left, right, .. } => {
                let l = self.resolve(left)?;
                let r = self.resolve(right)?;
                Ok(self.count_live_keys(&l)? + self.count_live_keys(&r)?)
            }
        }
    }

    fn count_leaves(&self, node: &TreeNode) -> Result<usize, StateError> {
        match node {
            TreeNode::Leaf { .. } => Ok(1),
            TreeNode::Inner { left, right, .. } => {
                let l = self.resolve(left)?;
                let r = self.resolve(right)?;
                Ok(self.count_leaves(&l)? + self.count_leaves(&r)?)
            }
        }
    }

    fn collect_entries(&self, node: &TreeNode) -> Result<Vec<(Key, Value)>, StateError> {
        match node {
            TreeNode::Leaf { bucket, .. } => Ok(bucket.clone()),
            TreeNode::Inner { left, right, .. } => {
                let l = self.resolve(left)?;
                let r = self.resolve(right)?;
                let mut out = self.collect_entries(&l)?;
                out.extend(self.collect_entries(&r)?);
                Ok(out)
            }
        }
    }

    /// Pure tree-shape update (no store I/O besides the resolves already
    /// needed to descend): insert/replace/delete `key`, splitting a
    /// `Leaf` that overflows and merging an `Inner` that collapses to at
    /// most `LEAF_SIZE` live keys.
    fn upsert(
        &self,
        node: TreeNode,
        key: &Key,
        key_hash: &Hash,
        value: Option<Value>,
    ) -> Result<TreeNode, StateError> {
        match node {
            TreeNode::Leaf { prefix, mut bucket, .. } => {
                let canon = key.canon();
                let existing = bucket.iter().position(|(k, _)| k.canon() == canon);
                match (existing, value) {
                    (Some(i), Some(v)) => bucket[i] = (key.clone(), v),
                    (Some(i), None) => {
                        bucket.remove(i);
                    }
                    (None, Some(v)) => bucket.push((key.clone(), v)),
                    (None, None) => {}
                }
                if bucket.len() > LEAF_SIZE {
                    Ok(self.build_subtree(prefix, bucket))
                } else {
                    Ok(TreeNode::Leaf {
                        prefix,
                        bucket,
                        cache: None,
                    })
                }
            }
            TreeNode::Inner {
                prefix,
                left,
                right,
                ..
            } => {
                let bit = bit_at(key_hash, prefix.len());
                let (target, other) = if bit { (right, left) } else { (left, right) };
                let target_node = self.resolve(&target)?;
                let updated_target = self.upsert(target_node, key, key_hash, value)?;
                let other_count = self.count_live_keys(&self.resolve(&other)?)?;
                let target_count = self.count_live_keys(&updated_target)?;

                if target_count + other_count <= LEAF_SIZE {
                    let other_node = self.resolve(&other)?;
                    let mut entries = self.collect_entries(&updated_target)?;
                    entries.extend(self.collect_entries(&other_node)?);
                    Ok(TreeNode::Leaf {
                        prefix,
                        bucket: entries,
                        cache: None,
                    })
                } else {
                    let new_target = Child::Inline(Box::new(updated_target));
                    let (new_left, new_right) = if bit {
                        (other, new_target)
                    } else {
                        (new_target, other)
                    };
                    Ok(TreeNode::Inner {
                        prefix,
                        left: new_left,
                        right: new_right,
                        cache: None,
                    })
                }
            }
        }
    }

    /// Partitions `entries` by successive routing bits until every
    /// resulting leaf holds at most `LEAF_SIZE` keys. A single overflow
    /// insert can require more than one split when many keys happen to
    /// share the same routing bit at this depth.
    fn build_subtree(&self, prefix: Prefix, entries: Vec<(Key, Value)>) -> TreeNode {
        if entries.len() <= LEAF_SIZE {
            return TreeNode::Leaf {
                prefix,
                bucket: entries,
                cache: None,
            };
        }
        let depth = prefix.len();
        let mut left_entries = Vec::new();
        let mut right_entries = Vec::new();
        for (k, v) in entries {
            let h = self.hasher.hash(&k.canon());
            if bit_at(&h, depth) {
                right_entries.push((k, v));
            } else {
                left_entries.push((k, v));
            }
        }
        let left = self.build_subtree(prefix.child(false), left_entries);
        let right = self.build_subtree(prefix.child(true), right_entries);
        TreeNode::Inner {
            prefix,
            left: Child::Inline(Box::new(left)),
            right: Child::Inline(Box::new(right)),
            cache: None,
        }
    }

    /// Recomputes hash-vectors bottom-up and writes every touched node
    /// to the store. Identical content always serialises to identical
    /// bytes, so re-freezing an unchanged subtree costs a read and a
    /// no-op write, never a new one.
    fn freeze(&self, node: TreeNode) -> Result<(TreeNode, StoreKey, HashVector), StateError> {
        match node {
            TreeNode::Leaf { prefix, bucket, .. } => {
                let hv = self.leaf_hash_vector(&prefix, &bucket);
                let frozen = TreeNode::Leaf {
                    prefix,
                    bucket,
                    cache: Some(hv.clone()),
                };
                let bytes = self.serializer.encode(&node_term(&frozen));
                let key = self.hasher.hash(&bytes);
                self.store.write(key, bytes)?;
                Ok((frozen, key, hv))
            }
            TreeNode::Inner {
                prefix,
                left,
                right,
                ..
            } => {
                let left_node = self.resolve(&left)?;
                let right_node = self.resolve(&right)?;
                let (_, left_key, left_hv) = self.freeze(left_node)?;
                let (_, right_key, right_hv) = self.freeze(right_node)?;
                let hv = self.inner_hash_vector(&left_hv, &right_hv);
                let frozen = TreeNode::Inner {
                    prefix,
                    left: Child::Stored(left_key),
                    right: Child::Stored(right_key),
                    cache: Some(hv.clone()),
                };
                let bytes = self.serializer.encode(&node_term(&frozen));
                let key = self.hasher.hash(&bytes);
                self.store.write(key, bytes)?;
                Ok((frozen, key, hv))
            }
        }
    }

    fn leaf_hash_vector(&self, prefix: &Prefix, bucket: &[(Key, Value)]) -> HashVector {
        let mut groups: Vec<Vec<(Key, Value)>> = vec![Vec::new(); LEAF_SIZE];
        for (k, v) in bucket {
            let h = self.hasher.hash(&k.canon());
            groups[slot_of(&h)].push((k.clone(), v.clone()));
        }
        let compute = |i: usize| -> Hash {
            let term = Term::list(vec![
                Term::Int(i as u64),
                prefix_term(prefix),
                entries_term(&groups[i]),
            ]);
            self.hasher.hash(&self.serializer.encode(&term))
        };
        let hashes: Vec<Hash> = if bucket.len() >= PARALLEL_THRESHOLD {
            (0..LEAF_SIZE).into_par_iter().map(compute).collect()
        } else {
            (0..LEAF_SIZE).map(compute).collect()
        };
        let mut slots = [[0u8; 32]; LEAF_SIZE];
        slots.copy_from_slice(&hashes);
        HashVector {
            slots,
            count: bucket.len() as u64,
        }
    }

    fn inner_hash_vector(&self, left: &HashVector, right: &HashVector) -> HashVector {
        let mut slots = [[0u8; 32]; LEAF_SIZE];
        for i in 0..LEAF_SIZE {
            let term = Term::list(vec![Term::bytes(left.slots[i].to_vec()), Term::bytes(right.slots[i].to_vec())]);
            slots[i] = self.hasher.hash(&self.serializer.encode(&term));
        }
        HashVector {
            slots,
            count: left.count + right.count,
        }
    }
}

fn hash_vector_term(hv: &HashVector) -> Term {
    Term::list(vec![
        Term::list(hv.slots.iter().map(|h| Term::bytes(h.to_vec())).collect::<Vec<_>>()),
        Term::Int(hv.count),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryNodeStore;
    use crate::domain::proofs::verify;
    use shared_types::{CanonicalEncoder, Keccak256Hasher};

    fn map() -> HashBackedMerkleMap {
        HashBackedMerkleMap::new(
            Arc::new(InMemoryNodeStore::new()),
            Arc::new(Keccak256Hasher),
            Arc::new(CanonicalEncoder),
        )
    }

    #[test]
    fn s1_empty_tree_is_fixed_and_empty() {
        let m = map();
        let root = m.empty_root().unwrap();
        let c0 = m.root_hash(&root).unwrap();
        assert_eq!(m.root_hash(&root).unwrap(), c0);
        assert_eq!(m.size(&root).unwrap(), 0);
        assert_eq!(m.get(&root, &Key::from("anything")).unwrap(), None);
    }

    #[test]
    fn s2_insert_then_delete_round_trips_to_c0() {
        let m = map();
        let empty = m.empty_root().unwrap();
        let c0 = m.root_hash(&empty).unwrap();
        let with_k = m.insert(&empty, Key::from("k"), Value::from("v")).unwrap();
        let back = m.delete(&with_k, &Key::from("k")).unwrap();
        assert_eq!(m.root_hash(&back).unwrap(), c0);
    }

    #[test]
    fn s3_split_boundary() {
        let m = map();
        let mut root17 = m.empty_root().unwrap();
        for i in 0..17 {
            root17 = m
                .insert(&root17, Key::from(format!("k{i}").as_str()), Value::from("v"))
                .unwrap();
        }
        assert!(m.bucket_count(&root17).unwrap() >= 2);

        let mut root16 = m.empty_root().unwrap();
        for i in 0..16 {
            root16 = m
                .insert(&root16, Key::from(format!("k{i}").as_str()), Value::from("v"))
                .unwrap();
        }
        assert_eq!(m.bucket_count(&root16).unwrap(), 1);
    }

    #[test]
    fn invariant1_insert_then_get_then_delete() {
        let m = map();
        let root = m.empty_root().unwrap();
        let root = m.insert(&root, Key::from("a"), Value::from("1")).unwrap();
        assert_eq!(m.get(&root, &Key::from("a")).unwrap(), Some(Value::from("1")));

        let zeroed = m.insert(&root, Key::from("a"), Value::Bytes(vec![0u8; 32])).unwrap();
        assert_eq!(m.get(&zeroed, &Key::from("a")).unwrap(), None);

        let deleted = m.delete(&root, &Key::from("a")).unwrap();
        assert_eq!(m.get(&deleted, &Key::from("a")).unwrap(), None);
    }

    #[test]
    fn invariant2_root_hash_is_order_independent() {
        let m = map();
        let pairs = vec![
            (Key::from("alpha"), Value::from("1")),
            (Key::from("beta"), Value::from("2")),
            (Key::from("gamma"), Value::from("3")),
        ];
        let mut forward = m.empty_root().unwrap();
        for (k, v) in pairs.clone() {
            forward = m.insert(&forward, k, v).unwrap();
        }
        let mut reversed = m.empty_root().unwrap();
        for (k, v) in pairs.into_iter().rev() {
            reversed = m.insert(&reversed, k, v).unwrap();
        }
        assert_eq!(m.root_hash(&forward).unwrap(), m.root_hash(&reversed).unwrap());
    }

    #[test]
    fn invariant3_restore_is_observably_equal() {
        let m = map();
        let root = m.empty_root().unwrap();
        let root = m.insert(&root, Key::from("a"), Value::from("1")).unwrap();
        let restored = m.restore(root.0).unwrap();
        assert_eq!(m.get(&restored, &Key::from("a")).unwrap(), Some(Value::from("1")));
        assert_eq!(m.root_hash(&restored).unwrap(), m.root_hash(&root).unwrap());
    }

    #[test]
    fn invariant4_structural_sharing_avoids_duplicate_writes() {
        let store = Arc::new(InMemoryNodeStore::new());
        let m = HashBackedMerkleMap::new(store.clone(), Arc::new(Keccak256Hasher), Arc::new(CanonicalEncoder));
        let root = m.empty_root().unwrap();
        let once = m.insert(&root, Key::from("a"), Value::from("1")).unwrap();
        let len_after_first = store.len();
        let twice = m.insert(&once, Key::from("a"), Value::from("1")).unwrap();
        assert_eq!(store.len(), len_after_first);
        assert_eq!(m.root_hash(&once).unwrap(), m.root_hash(&twice).unwrap());
    }

    #[test]
    fn invariant5_proof_soundness() {
        let m = map();
        let mut root = m.empty_root().unwrap();
        for i in 0..20u64 {
            root = m.insert(&root, Key::Int(i), Value::from("v")).unwrap();
        }
        let key = Key::Int(5);
        let proof = m.get_proof(&root, &key).unwrap();
        let root_hash = m.root_hash(&root).unwrap();
        let got = verify(&proof, &root_hash, &key, &Keccak256Hasher, &CanonicalEncoder);
        assert_eq!(got, m.get(&root, &key).unwrap());

        let missing_key = Key::Int(999);
        let missing_proof = m.get_proof(&root, &missing_key).unwrap();
        let missing = verify(&missing_proof, &root_hash, &missing_key, &Keccak256Hasher, &CanonicalEncoder);
        assert_eq!(missing, None);
    }

    #[test]
    fn insert_many_matches_sequential_inserts() {
        let m = map();
        let items: Vec<_> = (0..10u64).map(|i| (Key::Int(i), Value::from("v"))).collect();
        let batched = m.insert_many(&m.empty_root().unwrap(), items.clone()).unwrap();

        let mut sequential = m.empty_root().unwrap();
        for (k, v) in items {
            sequential = m.insert(&sequential, k, v).unwrap();
        }
        assert_eq!(m.root_hash(&batched).unwrap(), m.root_hash(&sequential).unwrap());
    }
}
