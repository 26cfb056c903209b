//! Core error types.

use thiserror::Error;

/// Errors surfaced by the device core outside the wire `Failure` channel.
///
/// Most failures travel to the host as `Failure` replies; this type covers
/// programmatic use of the core (harness, emulator) where a Rust error is
/// the right shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Underlying flash refused an operation.
    #[error(transparent)]
    Flash(#[from] crate::flash::FlashError),

    /// Persistent storage is unusable.
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    /// Wire-layer failure.
    #[error(transparent)]
    Protocol(#[from] coffer_proto::ProtocolError),
}
