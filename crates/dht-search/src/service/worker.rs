//! A single α-pool worker: a persistent loop that receives an
//! assignment, performs one RPC, and reports the outcome back to the
//! driver. Suspension only ever happens inside the RPC call.

use std::sync::Arc;

use peer_routing::{ItemKey, PeerItem};
use tokio::sync::mpsc;

use crate::domain::driver::RoundOutcome;
use crate::ports::transport::{Command, Response, Transport};

pub enum WorkerMsg {
    Next(PeerItem),
    Done,
}

pub struct WorkerResult {
    pub worker_id: usize,
    pub from_peer: Option<PeerItem>,
    pub outcome: RoundOutcome,
}

pub async fn run_worker(
    worker_id: usize,
    mut cmd_rx: mpsc::Receiver<WorkerMsg>,
    result_tx: mpsc::Sender<WorkerResult>,
    transport: Arc<dyn Transport>,
    command: Command,
    key: ItemKey,
) {
    while let Some(msg) = cmd_rx.recv().await {
        match msg {
            WorkerMsg::Done => return,
            WorkerMsg::Next(peer) => {
                let outcome = match transport.rpc(&peer, command, key).await {
                    Ok(Response::Nodes(nodes)) => RoundOutcome::Nodes(nodes),
                    Ok(Response::Value(value)) => RoundOutcome::Value(value),
                    Err(err) => {
                        tracing::debug!(worker_id, %err, "rpc failed, reporting empty node list");
                        RoundOutcome::Nodes(Vec::new())
                    }
                };
                if result_tx
                    .send(WorkerResult {
                        worker_id,
                        from_peer: Some(peer),
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    // Driver is gone; nothing left to report to.
                    return;
                }
            }
        }
    }
}
