//! Distributed validation cluster control plane: node registry with
//! heartbeat failure detection, resource-aware request dispatch, and a
//! metrics/alerting/trend-analysis pipeline, wired together by
//! [`ClusterMonitor`].

pub mod alerting;
pub mod backoff;
pub mod cluster_monitor;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod failure_detector;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod response_time;
pub mod telemetry;

pub use alerting::{Alert, AlertKind, AlertManager, AlertSeverity, Signal, SubscriptionToken};
pub use backoff::{BackoffCoordinator, BackoffDecision, ErrorClass};
pub use cluster_monitor::{ClusterMonitor, HeartbeatGuidance};
pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult};
pub use failure_detector::FailoverExecutor;
pub use model::{
    NodeCapabilities, NodeEntry, NodeId, NodeStatus, NodeView, Priority, Request, RequestId,
    ResourceSample, RuntimeProbe,
};
pub use registry::NodeRegistry;
