//! The RPC collaborator: the only command vocabulary this core issues
//! is `FindNode`/`FindValue`.

use async_trait::async_trait;
use peer_routing::{ItemKey, PeerItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    FindNode,
    FindValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Nodes(Vec<PeerItem>),
    Value(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("rpc timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Other(String),
}

/// A per-call timeout is the transport's responsibility; a timed-out or
/// failed call is swallowed by the worker into an empty node list.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn rpc(&self, peer: &PeerItem, command: Command, key: ItemKey) -> Result<Response, TransportError>;
}
