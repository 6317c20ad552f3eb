pub mod entities;
pub mod errors;
pub mod node;
pub mod proofs;
pub mod tree;

pub use entities::{Key, Prefix, Value, LEAF_SIZE};
pub use errors::StateError;
pub use node::{Child, HashVector, StoreKey, TreeNode};
pub use proofs::{verify, InnerStep, Proof};
pub use tree::{HashBackedMerkleMap, Root};
