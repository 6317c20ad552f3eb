//! Wires the pure `Driver` state machine to a live α-worker pool. This
//! is the `GenServer`-style process turned into an owned state machine
//! driven by channels, per the design notes.

pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use peer_routing::{ItemKey, PeerItem};
use shared_types::{Hasher, Wallet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::domain::driver::{Driver, RoundOutcome, SearchResult};
use crate::domain::errors::SearchError;
use crate::ports::transport::{Command, Transport};
use worker::{run_worker, WorkerMsg, WorkerResult};

const ALPHA: usize = 3;

/// Sends `Done` to every worker when dropped -- the idiomatic-Rust
/// analogue of "the caller drops the result channel": cancelling the
/// `find` future (or racing it against a caller-supplied signal) tears
/// this guard down and cascades shutdown to the pool.
struct WorkerGuard {
    cmd_txs: Vec<mpsc::Sender<WorkerMsg>>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        for tx in &self.cmd_txs {
            let _ = tx.try_send(WorkerMsg::Done);
        }
    }
}

/// `find(key, seeds, k, command)`: the IPS entry point. `seeds` should
/// already be `KBRT::nearest_n(key, k)`. Pass `cancel` to allow the
/// caller to abort the search early with `SearchError::SearchCancelled`.
pub async fn find(
    key: ItemKey,
    seeds: Vec<PeerItem>,
    k: usize,
    command: Command,
    transport: Arc<dyn Transport>,
    wallet: Arc<dyn Wallet>,
    hasher: Arc<dyn Hasher>,
    cancel: Option<oneshot::Receiver<()>>,
) -> Result<SearchResult, SearchError> {
    let mut driver = Driver::new(key, seeds, k, command, wallet, hasher);

    let (result_tx, mut result_rx) = mpsc::channel::<WorkerResult>(ALPHA * 4);
    let mut join_set: JoinSet<()> = JoinSet::new();
    let mut task_ids: HashMap<tokio::task::Id, usize> = HashMap::new();
    let mut cmd_txs: Vec<mpsc::Sender<WorkerMsg>> = Vec::with_capacity(ALPHA);

    for worker_id in 0..ALPHA {
        let tx = spawn_worker(
            worker_id,
            &mut join_set,
            &mut task_ids,
            result_tx.clone(),
            transport.clone(),
            command,
            key,
        );
        cmd_txs.push(tx);
    }
    let mut guard = WorkerGuard { cmd_txs };

    let mut waiting: Vec<usize> = (0..ALPHA).collect();
    let mut outstanding: HashMap<usize, PeerItem> = HashMap::new();

    dispatch_round(&mut driver, &mut waiting, &mut outstanding, &guard.cmd_txs).await;

    let mut cancel = cancel;

    let outcome = loop {
        if driver.is_queryable_empty() && waiting.len() == ALPHA {
            break Ok(driver.final_result());
        }

        // `if cancel.is_some()` keeps this branch disabled once the
        // sender side is gone, so the already-closed receiver is never
        // polled again after it first resolves to `Err`.
        let cancel_is_some = cancel.is_some();
        let cancel_fut = async {
            match cancel.as_mut() {
                Some(rx) => rx.await.is_ok(),
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            cancelled = cancel_fut, if cancel_is_some => {
                if cancelled {
                    break Err(SearchError::SearchCancelled);
                }
                // Sender was dropped without cancelling; stop watching it.
                cancel = None;
            }

            maybe_msg = result_rx.recv() => {
                match maybe_msg {
                    None => break Ok(driver.final_result()),
                    Some(WorkerResult { worker_id, from_peer, outcome }) => {
                        outstanding.remove(&worker_id);
                        waiting.push(worker_id);
                        if let Some(result) = driver.apply(from_peer, outcome) {
                            break Ok(result);
                        }
                        dispatch_round(&mut driver, &mut waiting, &mut outstanding, &guard.cmd_txs).await;
                    }
                }
            }

            Some(join_result) = join_set.join_next_with_id(), if !join_set.is_empty() => {
                if let Err(join_err) = join_result {
                    let task_id = join_err.id();
                    if let Some(worker_id) = task_ids.remove(&task_id) {
                        tracing::warn!(worker_id, "search worker crashed, respawning");
                        let tx = spawn_worker(
                            worker_id,
                            &mut join_set,
                            &mut task_ids,
                            result_tx.clone(),
                            transport.clone(),
                            command,
                            key,
                        );
                        guard.cmd_txs[worker_id] = tx;
                        if let Some(peer) = outstanding.remove(&worker_id) {
                            if let Some(result) = driver.apply(Some(peer), RoundOutcome::Nodes(Vec::new())) {
                                break Ok(result);
                            }
                        }
                        waiting.push(worker_id);
                        dispatch_round(&mut driver, &mut waiting, &mut outstanding, &guard.cmd_txs).await;
                    }
                }
            }
        }
    };

    drop(guard); // cascades Done to every worker regardless of outcome
    outcome
}

fn spawn_worker(
    worker_id: usize,
    join_set: &mut JoinSet<()>,
    task_ids: &mut HashMap<tokio::task::Id, usize>,
    result_tx: mpsc::Sender<WorkerResult>,
    transport: Arc<dyn Transport>,
    command: Command,
    key: ItemKey,
) -> mpsc::Sender<WorkerMsg> {
    let (tx, rx) = mpsc::channel(1);
    let handle = join_set.spawn(run_worker(worker_id, rx, result_tx, transport, command, key));
    task_ids.insert(handle.id(), worker_id);
    tx
}

async fn dispatch_round(
    driver: &mut Driver,
    waiting: &mut Vec<usize>,
    outstanding: &mut HashMap<usize, PeerItem>,
    cmd_txs: &[mpsc::Sender<WorkerMsg>],
) {
    let assignments = driver.dispatch(waiting.len());
    for peer in assignments {
        let worker_id = waiting.remove(0);
        outstanding.insert(worker_id, peer.clone());
        let _ = cmd_txs[worker_id].send(WorkerMsg::Next(peer)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use peer_routing::{derive_item_key, PeerObject, ServerDescriptor};
    use shared_types::{HashedWallet, Keccak256Hasher, NodeId};
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    use crate::ports::transport::{Response, TransportError};

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

    /// A fixed peer graph: `rpc` answers purely from a pre-scripted table,
    /// so a search against it always visits the same peers in the same
    /// distance order.
    struct ScriptedTransport {
        script: StdHashMap<[u8; 32], Response>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn rpc(
            &self,
            peer: &PeerItem,
            _command: Command,
            _key: ItemKey,
        ) -> Result<Response, TransportError> {
            Ok(self
                .script
                .get(peer.id.as_bytes())
                .cloned()
                .unwrap_or_else(|| Response::Nodes(Vec::new())))
        }
    }

    fn wallet_and_hasher() -> (Arc<dyn Wallet>, Arc<dyn Hasher>) {
        (Arc::new(HashedWallet::new(Keccak256Hasher)), Arc::new(Keccak256Hasher))
    }

    #[tokio::test]
    async fn s6_one_seed_returning_value_terminates_within_one_round() {
        let (wallet, hasher) = wallet_and_hasher();
        let seeds: Vec<PeerItem> = (1..=3u8).map(peer).collect();

        let mut script = StdHashMap::new();
        script.insert(*seeds[0].id.as_bytes(), Response::Value(b"answer".to_vec()));
        script.insert(*seeds[1].id.as_bytes(), Response::Nodes(Vec::new()));
        script.insert(*seeds[2].id.as_bytes(), Response::Nodes(Vec::new()));
        let transport = Arc::new(ScriptedTransport { script });

        let key = derive_item_key(wallet.as_ref(), hasher.as_ref(), &NodeId::new([0x99u8; 32]));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            find(key, seeds.clone(), 3, Command::FindValue, transport, wallet, hasher, None),
        )
        .await
        .expect("search did not terminate")
        .expect("search should not be cancelled");

        match result {
            SearchResult::Value { value, nodes } => {
                assert_eq!(value, b"answer".to_vec());
                let ids: std::collections::HashSet<_> = nodes.iter().map(|p| p.id).collect();
                for s in &seeds {
                    assert!(ids.contains(&s.id));
                }
            }
            SearchResult::Nodes { .. } => panic!("expected a terminal Value result"),
        }
    }

    #[tokio::test]
    async fn invariant9_terminates_over_a_finite_reachable_graph() {
        let (wallet, hasher) = wallet_and_hasher();
        // peer(1) -> {peer(2), peer(3)} -> {peer(4)} -> {} : a finite chain.
        let mut script = StdHashMap::new();
        script.insert(*peer(1).id.as_bytes(), Response::Nodes(vec![peer(2), peer(3)]));
        script.insert(*peer(2).id.as_bytes(), Response::Nodes(vec![peer(4)]));
        script.insert(*peer(3).id.as_bytes(), Response::Nodes(Vec::new()));
        script.insert(*peer(4).id.as_bytes(), Response::Nodes(Vec::new()));
        let transport = Arc::new(ScriptedTransport { script });

        let key = derive_item_key(wallet.as_ref(), hasher.as_ref(), &NodeId::new([0x77u8; 32]));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            find(key, vec![peer(1)], 3, Command::FindNode, transport, wallet, hasher, None),
        )
        .await
        .expect("search did not terminate within the reachable graph")
        .expect("search should not be cancelled");

        let SearchResult::Nodes { nodes } = result else {
            panic!("expected a Nodes result");
        };
        assert!(nodes.len() <= 3);
        let reachable: std::collections::HashSet<_> = [1u8, 2, 3, 4].into_iter().collect();
        for p in &nodes {
            assert!(reachable.contains(&p.id.as_bytes()[0]));
        }
    }

    /// Never resolves within a test's lifetime, so a search against it can
    /// only end via cancellation.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn rpc(
            &self,
            _peer: &PeerItem,
            _command: Command,
            _key: ItemKey,
        ) -> Result<Response, TransportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Response::Nodes(Vec::new()))
        }
    }

    #[tokio::test]
    async fn cancellation_stops_the_search_before_natural_termination() {
        let (wallet, hasher) = wallet_and_hasher();
        let transport = Arc::new(HangingTransport);
        let key = derive_item_key(wallet.as_ref(), hasher.as_ref(), &NodeId::new([0x11u8; 32]));
        let (tx, rx) = oneshot::channel();
        let seeds: Vec<PeerItem> = (1..=5u8).map(peer).collect();
        let handle = tokio::spawn(find(
            key,
            seeds,
            3,
            Command::FindNode,
            transport,
            wallet,
            hasher,
            Some(rx),
        ));
        let _ = tx.send(());
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task did not join in time")
            .expect("task panicked");
        assert!(matches!(result, Err(SearchError::SearchCancelled)));
    }
}
