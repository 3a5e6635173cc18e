//! C5: FailureDetector — periodic sweep marking nodes failed once their
//! heartbeat gap exceeds the configured threshold, and signaling (never
//! reassigning) failover.

use crate::alerting::{AlertManager, AlertKind, AlertSeverity};
use crate::config::ClusterConfig;
use crate::model::NodeId;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// External collaborator invoked on a newly-Failed node. The detector only
/// signals — it never reassigns in-flight work itself.
#[async_trait]
pub trait FailoverExecutor: Send + Sync {
    async fn execute(&self, node: NodeId);
}

pub struct FailureDetector {
    registry: Arc<NodeRegistry>,
    alerts: Arc<AlertManager>,
    failover: Option<Arc<dyn FailoverExecutor>>,
    interval: Duration,
    failure_threshold: u32,
    failover_timeout: Duration,
    enable_automatic_failover: bool,
}

impl FailureDetector {
    pub fn new(
        registry: Arc<NodeRegistry>,
        alerts: Arc<AlertManager>,
        failover: Option<Arc<dyn FailoverExecutor>>,
        config: &ClusterConfig,
    ) -> Self {
        Self {
            registry,
            alerts,
            failover,
            interval: config.node_health_check_interval,
            failure_threshold: config.node_failure_threshold,
            failover_timeout: config.failover_timeout,
            enable_automatic_failover: config.enable_automatic_failover,
        }
    }

    /// One sweep. Exposed separately from `run` so tests can drive it
    /// deterministically without waiting on real time.
    pub async fn tick(&self) {
        let now = Instant::now();
        let threshold = self.interval * self.failure_threshold;
        for entry in self.registry.snapshot() {
            if entry.status == crate::model::NodeStatus::Failed {
                continue;
            }
            if now.saturating_duration_since(entry.last_heartbeat) > threshold
                && self.registry.mark_failed(&entry.node_id)
            {
                // Ordering guarantee: the alert is raised in the same
                // synchronous step that removed the node from
                // dispatcher-visible state, so a reader can never
                // observe the alert before the node is gone.
                self.alerts.raise(crate::alerting::Alert {
                    id: Uuid::nil(),
                    node_id: Some(entry.node_id.clone()),
                    kind: AlertKind::NodeFailure,
                    severity: AlertSeverity::Critical,
                    metric_kind: None,
                    value: 0.0,
                    threshold: 0.0,
                    message: format!("node {} exceeded heartbeat threshold", entry.node_id),
                    created_at: Utc::now(),
                });

                if self.enable_automatic_failover {
                    if let Some(executor) = &self.failover {
                        let node_id = entry.node_id.clone();
                        let executor = executor.clone();
                        let timeout = self.failover_timeout;
                        if tokio::time::timeout(timeout, executor.execute(node_id.clone()))
                            .await
                            .is_err()
                        {
                            tracing::warn!(node = %node_id, "failover callback exceeded failoverTimeout");
                        }
                    }
                }
            }
        }
    }

    /// Runs the periodic sweep until `cancellation` fires. The sleep
    /// itself observes cancellation so shutdown is immediate even mid-wait.
    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeCapabilities;
    use std::collections::HashSet;

    fn caps() -> NodeCapabilities {
        NodeCapabilities {
            max_concurrent_jobs: 1,
            cpu_cores: 1,
            memory_bytes: 1,
            supported_validators: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn tick_marks_stale_node_failed_and_raises_once() {
        let registry = Arc::new(NodeRegistry::new());
        let alerts = AlertManager::new(Duration::from_secs(10), 10, CancellationToken::new());
        let mut config = ClusterConfig::default();
        config.node_health_check_interval = Duration::from_millis(1);
        config.node_failure_threshold = 1;

        let id = NodeId::new("stale");
        registry.register(id.clone(), caps()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let detector = FailureDetector::new(registry.clone(), alerts.clone(), None, &config);
        detector.tick().await;
        detector.tick().await;

        assert_eq!(registry.get(&id).unwrap().status, crate::model::NodeStatus::Failed);
        assert_eq!(alerts.active().len(), 1);
    }
}
