//! Error taxonomy for lane and pool operations

use crate::hook::Fault;
use crate::lane::LaneId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LaneError>;

/// Errors surfaced by the registry, lanes and pools.
///
/// `NotFound`, `AlreadyExists` and `Uninitialized` are synchronous failures
/// at the call site. `Cancelled` and `Faulted` travel through completion
/// handles to whoever extracts the result. `Disposed` covers the race of
/// posting to a lane or pool that is mid-teardown.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LaneError {
    /// No lane registered under the given name.
    #[error("lane not found: {0}")]
    NotFound(String),

    /// No lane registered under the given id.
    #[error("lane not found: id {}", .0.as_u64())]
    NotFoundId(LaneId),

    /// A lane with this name already exists.
    #[error("lane name already exists: {0}")]
    AlreadyExists(String),

    /// Attempted to remove one of the built-in lanes.
    #[error("cannot remove built-in lane: {0}")]
    BuiltIn(String),

    /// The registry has not been initialized yet.
    #[error("runtime is not initialized; call initialize() first")]
    Uninitialized,

    /// The ambient cancellation token was signalled at a suspension boundary.
    #[error("operation was cancelled")]
    Cancelled,

    /// A posted action panicked; carries the captured fault.
    #[error("posted action faulted: {0}")]
    Faulted(Fault),

    /// The target lane or pool has been disposed.
    #[error("{0} is disposed")]
    Disposed(String),
}
