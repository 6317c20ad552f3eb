#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The caller dropped the result channel; workers were sent `Done`
    /// and the driver aborted cleanly.
    #[error("search cancelled")]
    SearchCancelled,
}
