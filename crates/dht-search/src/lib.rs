//! # dht-search
//!
//! Iterative Parallel Search (IPS): a bounded-parallelism (`α`) lookup
//! driver that walks a DHT via repeated `FIND_NODE`/`FIND_VALUE` rounds,
//! converging on the `k` peers nearest a target key.
//!
//! The state machine (`domain::Driver`) is pure and channel-free; the
//! service layer (`service::find`) owns the worker pool, crash
//! recovery, and cancellation, and is the crate's entry point.
//!
//! Domain invariants:
//!
//! | id | invariant |
//! |----|-----------|
//! | INVARIANT-8 | the returned node set is a subset of visited peers, sorted by distance to the key, with `\|result\| <= k` |
//! | INVARIANT-9 | with deterministic transport responses, the search terminates after a number of rounds bounded by the reachable peer graph |

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{Driver, RoundOutcome, SearchError, SearchResult};
pub use ports::{Command, Response, Transport, TransportError};
pub use service::find;
