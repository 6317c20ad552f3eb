//! In-memory `NodeStore` adapter, primarily for tests and for embedding
//! the tree in a process that keeps state purely in RAM.

use std::collections::HashMap;
use std::sync::RwLock;

use shared_types::Hash;

use crate::domain::errors::StateError;
use crate::ports::store::NodeStore;

#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeStore for InMemoryNodeStore {
    fn read(&self, key: &Hash) -> Result<Option<Vec<u8>>, StateError> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| StateError::StoreIOError("lock poisoned".into()))?;
        Ok(nodes.get(key).cloned())
    }

    fn write(&self, key: Hash, bytes: Vec<u8>) -> Result<(), StateError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|_| StateError::StoreIOError("lock poisoned".into()))?;
        // Idempotent: an identical value already under this key performs
        // no net new write.
        if nodes.get(&key).map(|existing| existing == &bytes) != Some(true) {
            nodes.insert(key, bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_write() {
        let store = InMemoryNodeStore::new();
        store.write([1u8; 32], vec![1, 2, 3]).unwrap();
        assert_eq!(store.read(&[1u8; 32]).unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn missing_key_reads_as_none() {
        let store = InMemoryNodeStore::new();
        assert_eq!(store.read(&[9u8; 32]).unwrap(), None);
    }
}
