//! `KBuckets`: the routing table built atop `KTree`.

use shared_types::{NodeId, Wallet};

use super::distance::distance;
use super::entities::{bit_at, derive_item_key, ItemKey, KTree, PeerItem, PeerObject, K};

pub struct KBuckets {
    self_id: NodeId,
    self_key: ItemKey,
    root: KTree,
}

impl KBuckets {
    pub fn new(self_id: NodeId, wallet: &dyn Wallet, hasher: &dyn shared_types::Hasher) -> Self {
        let self_key = derive_item_key(wallet, hasher, &self_id);
        let self_item = PeerItem {
            id: self_id,
            last_seen: 0,
            object: PeerObject::SelfMarker,
            retries: 0,
        };
        KBuckets {
            self_id,
            self_key,
            root: KTree::Leaf {
                prefix: Vec::new(),
                items: vec![(self_key, self_item)],
            },
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn insert_item(&mut self, key: ItemKey, item: PeerItem) {
        self.root = insert_rec(std::mem::replace(
            &mut self.root,
            KTree::Leaf {
                prefix: Vec::new(),
                items: Vec::new(),
            },
        ), key, item, self.self_key);
    }

    pub fn insert_items(&mut self, items: Vec<(ItemKey, PeerItem)>) {
        for (key, item) in items {
            self.insert_item(key, item);
        }
    }

    pub fn delete_item(&mut self, key: &ItemKey) {
        delete_rec(&mut self.root, key);
    }

    /// Replace-if-present; a no-op if the key is absent.
    pub fn update_item(&mut self, key: &ItemKey, item: PeerItem) {
        update_rec(&mut self.root, key, item);
    }

    pub fn member(&self, key: &ItemKey) -> bool {
        self.item(key).is_some()
    }

    pub fn item(&self, key: &ItemKey) -> Option<&PeerItem> {
        find_rec(&self.root, key)
    }

    pub fn nearest_n(&self, target: &ItemKey, n: usize, now: i64) -> Vec<PeerItem> {
        let mut acc = Vec::new();
        collect_nearest(&self.root, target, n, now, 0, &mut acc);
        acc.sort_by(|(ak, _), (bk, _)| distance(ak, target).cmp(&distance(bk, target)));
        acc.truncate(n);
        acc.into_iter().map(|(_, p)| p).collect()
    }

    /// `nearest_n` filtered to peers no farther from `target` than this
    /// table's own `self_id` -- "<=" per the open-question resolution.
    pub fn nearer_n(&self, target: &ItemKey, n: usize, now: i64) -> Vec<PeerItem> {
        let self_distance = distance(&self.self_key, target);
        let mut acc = Vec::new();
        collect_nearest(&self.root, target, n, now, 0, &mut acc);
        acc.retain(|(k, _)| distance(k, target) <= self_distance);
        acc.sort_by(|(ak, _), (bk, _)| distance(ak, target).cmp(&distance(bk, target)));
        acc.truncate(n);
        acc.into_iter().map(|(_, p)| p).collect()
    }

    pub fn to_list(&self) -> Vec<PeerItem> {
        let mut out = Vec::new();
        collect_all(&self.root, &mut out);
        out
    }

    pub fn to_ring_list(&self, pivot: &ItemKey) -> Vec<PeerItem> {
        let mut all: Vec<(ItemKey, PeerItem)> = {
            let mut out = Vec::new();
            collect_all_keyed(&self.root, &mut out);
            out.into_iter().filter(|(k, _)| k != pivot).collect()
        };
        all.sort_by(|a, b| a.0.cmp(&b.0));
        let split_at = all.iter().position(|(k, _)| k > pivot).unwrap_or(0);
        let mut rotated = all.split_off(split_at);
        rotated.extend(all);
        rotated.into_iter().map(|(_, p)| p).collect()
    }

    pub fn next_n(&self, pivot: &ItemKey, n: usize) -> Vec<PeerItem> {
        self.to_ring_list(pivot).into_iter().take(n).collect()
    }

    pub fn prev_n(&self, pivot: &ItemKey, n: usize) -> Vec<PeerItem> {
        let ring = self.to_ring_list(pivot);
        let start = ring.len().saturating_sub(n);
        let mut tail = ring[start..].to_vec();
        tail.reverse();
        tail
    }

    pub fn size(&self) -> usize {
        count_rec(&self.root)
    }

    pub fn bucket_count(&self) -> usize {
        count_leaves(&self.root)
    }
}

fn insert_rec(node: KTree, key: ItemKey, item: PeerItem, self_key: ItemKey) -> KTree {
    match node {
        KTree::Leaf { prefix, mut items } => {
            if let Some(pos) = items.iter().position(|(k, _)| *k == key) {
                items[pos] = (key, item);
                return KTree::Leaf { prefix, items };
            }
            if items.len() < K {
                items.push((key, item));
                return KTree::Leaf { prefix, items };
            }
            let contains_self = items.iter().any(|(k, _)| *k == self_key);
            if !contains_self {
                // Bucket saturation preserves established contacts.
                return KTree::Leaf { prefix, items };
            }
            items.push((key, item));
            build_split(prefix, items, self_key)
        }
        KTree::Inner { prefix, zero, one } => {
            let depth = prefix.len();
            if bit_at(&key, depth) {
                KTree::Inner {
                    prefix,
                    zero,
                    one: Box::new(insert_rec(*one, key, item, self_key)),
                }
            } else {
                KTree::Inner {
                    prefix,
                    zero: Box::new(insert_rec(*zero, key, item, self_key)),
                    one,
                }
            }
        }
    }
}

/// Splits an overflowing leaf by its next routing bit. A side that ends
/// up over `K` without holding `self` is truncated rather than split
/// again -- only the self-containing bucket is ever allowed to grow the
/// tree deeper.
fn build_split(prefix: Vec<bool>, items: Vec<(ItemKey, PeerItem)>, self_key: ItemKey) -> KTree {
    if items.len() <= K {
        return KTree::Leaf { prefix, items };
    }
    if !items.iter().any(|(k, _)| *k == self_key) {
        let mut items = items;
        items.truncate(K);
        return KTree::Leaf { prefix, items };
    }
    let depth = prefix.len();
    let mut zero_items = Vec::new();
    let mut one_items = Vec::new();
    for (k, v) in items {
        if bit_at(&k, depth) {
            one_items.push((k, v));
        } else {
            zero_items.push((k, v));
        }
    }
    let mut zero_prefix = prefix.clone();
    zero_prefix.push(false);
    let mut one_prefix = prefix.clone();
    one_prefix.push(true);
    KTree::Inner {
        prefix,
        zero: Box::new(build_split(zero_prefix, zero_items, self_key)),
        one: Box::new(build_split(one_prefix, one_items, self_key)),
    }
}

fn delete_rec(node: &mut KTree, key: &ItemKey) {
    match node {
        KTree::Leaf { items, .. } => {
            items.retain(|(k, _)| k != key);
        }
        KTree::Inner { zero, one, prefix } => {
            let depth = prefix.len();
            if bit_at(key, depth) {
                delete_rec(one, key);
            } else {
                delete_rec(zero, key);
            }
        }
    }
}

fn update_rec(node: &mut KTree, key: &ItemKey, item: PeerItem) {
    match node {
        KTree::Leaf { items, .. } => {
            if let Some(slot) = items.iter_mut().find(|(k, _)| k == key) {
                slot.1 = item;
            }
        }
        KTree::Inner { zero, one, prefix } => {
            let depth = prefix.len();
            if bit_at(key, depth) {
                update_rec(one, key, item);
            } else {
                update_rec(zero, key, item);
            }
        }
    }
}

fn find_rec<'a>(node: &'a KTree, key: &ItemKey) -> Option<&'a PeerItem> {
    match node {
        KTree::Leaf { items, .. } => items.iter().find(|(k, _)| k == key).map(|(_, v)| v),
        KTree::Inner { zero, one, prefix } => {
            let depth = prefix.len();
            if bit_at(key, depth) {
                find_rec(one, key)
            } else {
                find_rec(zero, key)
            }
        }
    }
}

fn collect_nearest(
    node: &KTree,
    target: &ItemKey,
    n: usize,
    now: i64,
    depth: usize,
    acc: &mut Vec<(ItemKey, PeerItem)>,
) {
    match node {
        KTree::Leaf { items, .. } => {
            acc.extend(
                items
                    .iter()
                    .filter(|(_, p)| !p.is_disabled(now))
                    .cloned(),
            );
        }
        KTree::Inner { zero, one, .. } => {
            let target_bit = bit_at(target, depth);
            let (near, far) = if target_bit { (one, zero) } else { (zero, one) };
            let before = acc.len();
            collect_nearest(near, target, n, now, depth + 1, acc);
            if acc.len() - before < n {
                collect_nearest(far, target, n, now, depth + 1, acc);
            }
        }
    }
}

fn collect_all(node: &KTree, out: &mut Vec<PeerItem>) {
    match node {
        KTree::Leaf { items, .. } => out.extend(items.iter().map(|(_, p)| p.clone())),
        KTree::Inner { zero, one, .. } => {
            collect_all(zero, out);
            collect_all(one, out);
        }
    }
}

fn collect_all_keyed(node: &KTree, out: &mut Vec<(ItemKey, PeerItem)>) {
    match node {
        KTree::Leaf { items, .. } => out.extend(items.iter().cloned()),
        KTree::Inner { zero, one, .. } => {
            collect_all_keyed(zero, out);
            collect_all_keyed(one, out);
        }
    }
}

fn count_rec(node: &KTree) -> usize {
    match node {
        KTree::Leaf { items, .. } => items.len(),
        KTree::Inner { zero, one, .. } => count_rec(zero) + count_rec(one),
    }
}

fn count_leaves(node: &KTree) -> usize {
    match node {
        KTree::Leaf { .. } => 1,
        KTree::Inner { zero, one, .. } => count_leaves(zero) + count_leaves(one),
    }
}
