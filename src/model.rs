//! Shared data model: node identity, capabilities, samples, and requests.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

/// Newtype wrapping a node's string identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Newtype wrapping a request's string identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A point-in-time measurement pushed by a worker node.
///
/// Every field is non-negative; percentage fields are expected in `[0, 100]`.
/// `NodeRegistry::heartbeat` is the validation boundary — it rejects a
/// sample violating this with `ClusterError::InvalidSample` before it ever
/// reaches dispatch scoring or trend analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_pct: f64,
    pub memory_used_bytes: u64,
    pub disk_io_bytes_per_sec: f64,
    pub network_bytes_per_sec: f64,
    pub active_handles: u64,
    pub active_connections: u64,
    pub queue_depth: u64,
}

impl ResourceSample {
    /// `ResourceAware` score: `0.4*cpuPct + 0.4*memPct + 0.2*diskIoPct`.
    ///
    /// `mem_pct` and `disk_io_pct` are supplied by the caller because they
    /// are only meaningful relative to a node's own capabilities.
    pub fn resource_aware_score(&self, mem_pct: f64, disk_io_pct: f64) -> f64 {
        0.4 * self.cpu_pct + 0.4 * mem_pct + 0.2 * disk_io_pct
    }

    /// Checks the invariant every field ≥ 0 and `cpu_pct` ∈ `[0, 100]`.
    /// Other ratio-shaped fields (disk/network throughput) have no fixed
    /// ceiling, only a non-negativity requirement.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.cpu_pct) {
            return Err(format!("cpu_pct must be in [0, 100], got {}", self.cpu_pct));
        }
        if self.disk_io_bytes_per_sec < 0.0 {
            return Err(format!(
                "disk_io_bytes_per_sec must be >= 0, got {}",
                self.disk_io_bytes_per_sec
            ));
        }
        if self.network_bytes_per_sec < 0.0 {
            return Err(format!(
                "network_bytes_per_sec must be >= 0, got {}",
                self.network_bytes_per_sec
            ));
        }
        Ok(())
    }
}

/// Immutable capabilities recorded at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub max_concurrent_jobs: u32,
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub supported_validators: HashSet<String>,
}

impl NodeCapabilities {
    /// Memory percentage a sample represents relative to this node's capacity.
    pub fn memory_pct(&self, used_bytes: u64) -> f64 {
        if self.memory_bytes == 0 {
            return 0.0;
        }
        (used_bytes as f64 / self.memory_bytes as f64) * 100.0
    }
}

/// Lifecycle state of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Healthy,
    Degraded,
    Failed,
}

/// Priority hint attached to an incoming request. Advisory only — no
/// strategy currently filters or reorders by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// An inbound validation request as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: RequestId,
    pub est_cpu: f64,
    pub est_memory_bytes: u64,
    pub est_duration_ms: u64,
    pub priority: Priority,
    pub validator_kind: Option<String>,
}

/// A node's full state as owned by the registry. Clones of this struct are
/// handed out as point-in-time, lock-free read views — never a raw
/// reference into the registry's internal map.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub node_id: NodeId,
    pub capabilities: NodeCapabilities,
    pub status: NodeStatus,
    pub last_heartbeat: Instant,
    pub latest_sample: Option<ResourceSample>,
    pub live_connections: u64,
}

/// Alias used at call sites that only read a node's state.
pub type NodeView = NodeEntry;

/// Capability a worker node implements to produce its own samples. The
/// core never reaches into a platform-specific GC or thread-pool API
/// directly — it only ever depends on this trait, so tests can inject
/// synthetic samples without a real worker process.
pub trait RuntimeProbe: Send + Sync {
    fn sample(&self) -> ResourceSample;
}
