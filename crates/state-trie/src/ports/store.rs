//! The content-addressed node store collaborator.

use shared_types::Hash;

use crate::domain::errors::StateError;

/// `read` must succeed for any key the tree believes is live -- a miss is
/// an `InvariantViolation`, not a `StateError::NotFound`, because the
/// caller only ever asks for keys it wrote itself. `restore` is the one
/// operation that tolerates an absent key.
pub trait NodeStore: Send + Sync {
    fn read(&self, key: &Hash) -> Result<Option<Vec<u8>>, StateError>;
    fn write(&self, key: Hash, bytes: Vec<u8>) -> Result<(), StateError>;
}
