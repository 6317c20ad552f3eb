//! The search driver's state machine, free of any tokio/channel
//! plumbing so it can be exercised with deterministic unit tests. The
//! service layer (`service::find`) owns the worker pool and feeds
//! responses into this state machine one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use peer_routing::{derive_item_key, distance, ItemKey, PeerItem};
use primitive_types::U256;
use shared_types::{Hasher, Wallet};

use crate::ports::transport::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    Nodes { nodes: Vec<PeerItem> },
    Value { value: Vec<u8>, nodes: Vec<PeerItem> },
}

/// Outcome of a single worker round-trip, as observed by the driver.
pub enum RoundOutcome {
    Value(Vec<u8>),
    Nodes(Vec<PeerItem>),
}

pub struct Driver {
    key: ItemKey,
    k: usize,
    #[allow(dead_code)]
    command: Command,
    wallet: Arc<dyn Wallet>,
    hasher: Arc<dyn Hasher>,
    min_distance: Option<U256>,
    queryable: Vec<(ItemKey, PeerItem)>,
    queried: HashMap<ItemKey, PeerItem>,
    visited: HashMap<ItemKey, PeerItem>,
}

impl Driver {
    pub fn new(
        key: ItemKey,
        seeds: Vec<PeerItem>,
        k: usize,
        command: Command,
        wallet: Arc<dyn Wallet>,
        hasher: Arc<dyn Hasher>,
    ) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut queryable = Vec::new();
        for peer in seeds {
            let ik = derive_item_key(wallet.as_ref(), hasher.as_ref(), &peer.id);
            if seen.insert(ik) {
                queryable.push((ik, peer));
            }
        }
        queryable.sort_by(|(ak, _), (bk, _)| distance(ak, &key).cmp(&distance(bk, &key)));
        Driver {
            key,
            k,
            command,
            wallet,
            hasher,
            min_distance: None,
            queryable,
            queried: HashMap::new(),
            visited: HashMap::new(),
        }
    }

    fn item_key(&self, peer: &PeerItem) -> ItemKey {
        derive_item_key(self.wallet.as_ref(), self.hasher.as_ref(), &peer.id)
    }

    /// Pops `min(|queryable|, idle_workers)` assignments from the head of
    /// `queryable`, moving each into `queried` before returning it -- a
    /// peer is recorded as queried strictly before a worker leaves
    /// `waiting` with its assignment.
    pub fn dispatch(&mut self, idle_workers: usize) -> Vec<PeerItem> {
        let n = self.queryable.len().min(idle_workers);
        let batch: Vec<_> = self.queryable.drain(0..n).collect();
        let mut out = Vec::with_capacity(batch.len());
        for (ik, peer) in batch {
            self.queried.insert(ik, peer.clone());
            out.push(peer);
        }
        out
    }

    /// Applies one worker response. `from_peer` is `None` when a crashed
    /// worker's outstanding assignment is folded in as "queried with
    /// empty response".
    pub fn apply(&mut self, from_peer: Option<PeerItem>, outcome: RoundOutcome) -> Option<SearchResult> {
        if let RoundOutcome::Value(v) = outcome {
            let mut nodes: Vec<PeerItem> = self.visited.values().cloned().collect();
            nodes.extend(self.queried.values().cloned());
            return Some(SearchResult::Value { value: v, nodes });
        }
        let RoundOutcome::Nodes(result) = outcome else {
            unreachable!()
        };

        for peer in &result {
            let ik = self.item_key(peer);
            self.visited.insert(ik, peer.clone());
        }

        if let Some(peer) = &from_peer {
            let d = distance(&self.item_key(peer), &self.key);
            self.min_distance = Some(self.min_distance.map_or(d, |m| m.min(d)));
        }

        let min_distance = self.min_distance;
        let mut candidates: HashMap<ItemKey, PeerItem> = self
            .queryable
            .drain(..)
            .collect::<Vec<_>>()
            .into_iter()
            .collect();
        for peer in result {
            let ik = self.item_key(&peer);
            candidates.insert(ik, peer);
        }
        let mut filtered: Vec<(ItemKey, PeerItem)> = candidates
            .into_iter()
            .filter(|(ik, _)| {
                !self.queried.contains_key(ik)
                    && min_distance.map_or(true, |m| distance(ik, &self.key) < m)
            })
            .collect();
        filtered.sort_by(|(ak, _), (bk, _)| distance(ak, &self.key).cmp(&distance(bk, &self.key)));
        filtered.truncate(self.k);
        self.queryable = filtered;

        None
    }

    pub fn is_queryable_empty(&self) -> bool {
        self.queryable.is_empty()
    }

    pub fn final_result(&self) -> SearchResult {
        let mut all: HashMap<ItemKey, PeerItem> = self.queried.clone();
        for (k, v) in &self.visited {
            all.entry(*k).or_insert_with(|| v.clone());
        }
        let mut nodes: Vec<(ItemKey, PeerItem)> = all.into_iter().collect();
        nodes.sort_by(|(ak, _), (bk, _)| distance(ak, &self.key).cmp(&distance(bk, &self.key)));
        nodes.truncate(self.k);
        SearchResult::Nodes {
            nodes: nodes.into_iter().map(|(_, p)| p).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peer_routing::{PeerObject, ServerDescriptor};
    use shared_types::{HashedWallet, Keccak256Hasher, NodeId};

    fn wallet() -> Arc<dyn Wallet> {
        Arc::new(HashedWallet::new(Keccak256Hasher))
    }

    fn hasher() -> Arc<dyn Hasher> {
        Arc::new(Keccak256Hasher)
    }

    fn peer(n: u8) -> PeerItem {
        PeerItem {
            id: NodeId::new([n; 32]),
            last_seen: 0,
            object: PeerObject::ServerDescriptor(ServerDescriptor {
                host: "127.0.0.1".into(),
                port: 30303,
            }),
            retries: 0,
        }
    }

    fn driver_with(seeds: Vec<PeerItem>, k: usize) -> Driver {
        Driver::new([0x11u8; 32], seeds, k, Command::FindNode, wallet(), hasher())
    }

    #[test]
    fn new_dedups_seeds_and_sorts_by_distance() {
        let seeds = vec![peer(1), peer(1), peer(2), peer(3)];
        let d = driver_with(seeds, 20);
        assert_eq!(d.queryable.len(), 3);
        let mut distances: Vec<U256> = d
            .queryable
            .iter()
            .map(|(ik, _)| distance(ik, &d.key))
            .collect();
        let mut sorted = distances.clone();
        sorted.sort();
        assert_eq!(distances, sorted);
    }

    #[test]
    fn dispatch_moves_peers_into_queried_before_returning() {
        let mut d = driver_with(vec![peer(1), peer(2), peer(3)], 20);
        let batch = d.dispatch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(d.queried.len(), 2);
        assert_eq!(d.queryable.len(), 1);
        for peer in &batch {
            let ik = d.item_key(peer);
            assert!(d.queried.contains_key(&ik));
        }
    }

    #[test]
    fn dispatch_is_bounded_by_idle_workers_and_queryable_size() {
        let mut d = driver_with(vec![peer(1)], 20);
        let batch = d.dispatch(3);
        assert_eq!(batch.len(), 1);
        assert!(d.dispatch(3).is_empty());
    }

    #[test]
    fn apply_value_terminates_with_visited_union_queried() {
        let mut d = driver_with(vec![peer(1), peer(2)], 20);
        let assigned = d.dispatch(2);
        let result = d.apply(Some(assigned[0].clone()), RoundOutcome::Value(b"found".to_vec()));
        match result {
            Some(SearchResult::Value { value, nodes }) => {
                assert_eq!(value, b"found");
                assert_eq!(nodes.len(), 2);
            }
            _ => panic!("expected a terminal Value result"),
        }
    }

    #[test]
    fn apply_nodes_filters_already_queried_and_farther_candidates() {
        let mut d = driver_with(vec![peer(1)], 20);
        let assigned = d.dispatch(1);
        let discovered = vec![peer(1), peer(2), peer(3)];
        let outcome = d.apply(Some(assigned[0].clone()), RoundOutcome::Nodes(discovered));
        assert!(outcome.is_none());
        for (ik, _) in &d.queryable {
            assert!(!d.queried.contains_key(ik));
        }
    }

    #[test]
    fn invariant8_final_result_is_bounded_subset_sorted_by_distance() {
        let mut d = driver_with((1..=10u8).map(peer).collect(), 3);
        loop {
            let batch = d.dispatch(10);
            if batch.is_empty() {
                break;
            }
            for p in &batch {
                d.apply(Some(p.clone()), RoundOutcome::Nodes(Vec::new()));
            }
        }
        let result = d.final_result();
        let SearchResult::Nodes { nodes } = result else {
            panic!("expected Nodes result");
        };
        assert!(nodes.len() <= 3);
        let visited_ids: std::collections::HashSet<_> =
            d.visited.values().chain(d.queried.values()).map(|p| p.id).collect();
        assert!(nodes.iter().all(|p| visited_ids.contains(&p.id)));
        let mut distances: Vec<U256> = nodes
            .iter()
            .map(|p| distance(&d.item_key(p), &d.key))
            .collect();
        let mut sorted = distances.clone();
        sorted.sort();
        assert_eq!(distances, sorted);
    }
}
