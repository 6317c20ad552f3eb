//! Collision-resistant hash collaborator.
//!
//! Every core subsystem treats hashing as an abstract `bytes -> 32 bytes`
//! function. This module supplies the trait the domain layers depend on
//! plus a concrete Keccak256 implementation so the workspace builds and
//! runs end to end without a caller-supplied hasher.

use sha3::{Digest, Keccak256};

/// A 32-byte digest. Used for store keys, tree roots, and node identifiers.
pub type Hash = [u8; 32];

/// Collision-resistant hash function supplied by the host application.
///
/// The core never assumes a specific algorithm; it only relies on the
/// function being deterministic and preimage-resistant.
pub trait Hasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> Hash;
}

/// Default `Hasher` used when the caller does not supply its own.
///
/// Keccak256 matches the hash function used elsewhere in the node for
/// address derivation, so proofs and store keys stay consistent with the
/// rest of the stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Hasher;

impl Hasher for Keccak256Hasher {
    fn hash(&self, bytes: &[u8]) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_is_deterministic() {
        let h = Keccak256Hasher;
        assert_eq!(h.hash(b"abc"), h.hash(b"abc"));
    }

    #[test]
    fn keccak_distinguishes_inputs() {
        let h = Keccak256Hasher;
        assert_ne!(h.hash(b"abc"), h.hash(b"abd"));
    }
}
