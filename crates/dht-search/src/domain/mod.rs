pub mod driver;
pub mod errors;

pub use driver::{Driver, RoundOutcome, SearchResult};
pub use errors::SearchError;
