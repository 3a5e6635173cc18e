//! Error types for the cluster control plane

use thiserror::Error;

/// Result type for control-plane operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Flat error taxonomy surfaced by every public operation.
///
/// Recoverable variants (`NotRegistered`, `NoCandidate`, `Throttled`,
/// `ClusterUnhealthy`, `InvalidSample`) are returned to the caller as-is. `Canceled` is
/// sticky: once a component observes shutdown, every subsequent call
/// returns it. `Internal` is additionally raised as an `Emergency` alert
/// before propagating.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Node id unknown to the registry
    #[error("node {0} is not registered")]
    NotRegistered(String),

    /// Insufficient healthy nodes to satisfy the admission guard
    #[error("cluster unhealthy: {healthy} of {min_required} required healthy nodes")]
    ClusterUnhealthy { healthy: usize, min_required: usize },

    /// Response-time controller refused new work
    #[error("throttled: response-time budget exceeded")]
    Throttled,

    /// All strategies returned no candidate
    #[error("no candidate node available")]
    NoCandidate,

    /// Shutdown or caller cancellation
    #[error("operation canceled")]
    Canceled,

    /// Invalid configuration, fatal at construction
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A pushed `ResourceSample` violated the non-negative/percentage-range
    /// invariant; the sample is rejected rather than stored
    #[error("invalid resource sample: {0}")]
    InvalidSample(String),

    /// Unexpected internal error, promoted to an Emergency alert
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::time::SystemTimeError> for ClusterError {
    fn from(err: std::time::SystemTimeError) -> Self {
        ClusterError::Internal(err.to_string())
    }
}
