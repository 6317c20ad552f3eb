pub mod distance;
pub mod entities;
pub mod table;

pub use distance::distance;
pub use entities::{derive_item_key, ItemKey, KTree, PeerItem, PeerObject, ServerDescriptor, K};
pub use table::KBuckets;
