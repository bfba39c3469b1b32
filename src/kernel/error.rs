use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recoverable pipeline failures. None of these stop the frame loop;
/// they end up on the entity (`last_error`) or as a cache no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Directory query failed. The last good snapshot stays in use.
    #[error("target inventory unavailable")]
    InventoryUnavailable,
    /// Snapshot was empty at selection time.
    #[error("no placement targets available")]
    NoTargetsAvailable,
    /// Remote creation failed, was rejected, or timed out.
    #[error("provisioning request failed")]
    ProvisionFailed,
}

/// Process-level failures. Only raised when the dispatcher cannot hand work
/// to the async runtime at all.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no async runtime available to spawn placement task: {0}")]
    RuntimeUnavailable(#[from] tokio::runtime::TryCurrentError),
}
