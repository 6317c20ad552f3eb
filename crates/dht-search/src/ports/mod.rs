pub mod transport;

pub use transport::{Command, Response, Transport, TransportError};
