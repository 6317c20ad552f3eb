//! Error kinds per the core's error-handling design: `NotFound` and
//! `StoreIOError` are recoverable and returned to the caller;
//! `InvariantViolation` is fatal and must never be silently swallowed.

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// `restore` was asked for a `StoreKey` the store doesn't have.
    #[error("store key not found: {0:x?}")]
    NotFound([u8; 32]),

    /// The store collaborator failed; the mutation that triggered it is a
    /// no-op from the caller's point of view.
    #[error("store I/O error: {0}")]
    StoreIOError(String),

    /// A missing `StoreKey` child, a malformed prefix, or a hash mismatch
    /// on read-back. The tree must not keep operating past this.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
