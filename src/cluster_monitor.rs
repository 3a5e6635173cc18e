//! C10: ClusterMonitor — owns the lifecycle of C4–C9, schedules the
//! periodic tasks, and is the only public facade. All mutation of the
//! components it owns goes through here so shutdown is clean.

use crate::alerting::{default_policies, Alert, AlertManager, Policy, Signal, SubscriptionToken};
use crate::backoff::BackoffCoordinator;
use crate::config::ClusterConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ClusterError, ClusterResult};
use crate::failure_detector::{FailureDetector, FailoverExecutor};
use crate::metrics::aggregator::{ClusterAggregate, MetricsAggregator};
use crate::metrics::buffer::MetricKind;
use crate::metrics::trend;
use crate::model::{NodeCapabilities, NodeEntry, NodeId, NodeStatus, Request, ResourceSample};
use crate::registry::NodeRegistry;
use crate::response_time::ResponseTimeController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Guidance returned alongside a heartbeat, for the caller to act on
/// without a second round-trip.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatGuidance {
    pub throttle: bool,
    pub degraded: bool,
}

/// How long `close()` waits for periodic tasks to observe cancellation
/// before giving up on a graceful join.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct ClusterMonitor {
    config: ClusterConfig,
    registry: Arc<NodeRegistry>,
    aggregator: Arc<MetricsAggregator>,
    alerts: Arc<AlertManager>,
    response_time: Arc<ResponseTimeController>,
    backoff: Arc<BackoffCoordinator>,
    dispatcher: Arc<Dispatcher>,
    policies: Vec<Policy>,
    cancellation: CancellationToken,
    stopped: AtomicBool,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterMonitor {
    pub fn new(config: ClusterConfig, failover: Option<Arc<dyn FailoverExecutor>>) -> ClusterResult<Arc<Self>> {
        config.validate()?;

        let registry = Arc::new(NodeRegistry::new());
        let cancellation = CancellationToken::new();
        let alerts = AlertManager::new(
            config.alerting.aggregation_window,
            config.alerting.max_alerts_per_window,
            cancellation.clone(),
        );
        let aggregator = Arc::new(MetricsAggregator::new(4096, config.retention.metrics_window));
        let response_time = Arc::new(ResponseTimeController::new(config.response_time.clone()));
        let backoff = Arc::new(BackoffCoordinator::new(&config.backoff));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            aggregator.clone(),
            config.prediction_horizon,
        ));
        let detector = Arc::new(FailureDetector::new(
            registry.clone(),
            alerts.clone(),
            failover,
            &config,
        ));

        let monitor = Arc::new(Self {
            config,
            registry,
            aggregator,
            alerts,
            response_time,
            backoff,
            dispatcher,
            policies: default_policies(),
            cancellation,
            stopped: AtomicBool::new(false),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        monitor.spawn_periodic_tasks(detector);
        Ok(monitor)
    }

    fn spawn_periodic_tasks(self: &Arc<Self>, detector: Arc<FailureDetector>) {
        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");

        let cancellation = self.cancellation.clone();
        tasks.push(tokio::spawn(async move {
            detector.run(cancellation).await;
        }));

        let this = self.clone();
        let cancellation = self.cancellation.clone();
        let resync_interval = this.config.resync_interval;
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(resync_interval) => {
                        let nodes = this.registry.snapshot();
                        this.aggregator.resync(&nodes);
                    }
                }
            }
        }));

        let this = self.clone();
        let cancellation = self.cancellation.clone();
        let alert_history = Duration::from_secs(this.config.retention.alert_history_days as u64 * 86_400);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        this.alerts.archive_expired(alert_history);
                    }
                }
            }
        }));

        let this = self.clone();
        let cancellation = self.cancellation.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        this.response_time.trim_now();
                        this.backoff.evict_idle();
                    }
                }
            }
        }));
    }

    fn ensure_running(&self) -> ClusterResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(ClusterError::Canceled)
        } else {
            Ok(())
        }
    }

    #[tracing::instrument(skip(self, capabilities))]
    pub fn register_node(&self, node_id: NodeId, capabilities: NodeCapabilities) -> ClusterResult<()> {
        self.ensure_running()?;
        self.registry.register(node_id, capabilities)
    }

    #[tracing::instrument(skip(self, sample))]
    pub fn heartbeat(&self, node_id: &NodeId, sample: ResourceSample) -> ClusterResult<HeartbeatGuidance> {
        self.ensure_running()?;
        self.registry.heartbeat(node_id, sample)?;
        self.aggregator.publish(node_id, sample);

        let memory_series = self.aggregator.node_metric(node_id, MetricKind::Memory);
        let memory_trend = trend::analyze(&memory_series);
        match memory_trend.leak {
            trend::LeakSignal::SteadyLeak { rmse } => {
                self.alerts.observe(
                    &Signal::SteadyLeak { node: node_id.clone(), rmse },
                    &self.config,
                    &self.policies,
                );
            }
            trend::LeakSignal::SawtoothLeak { peaks, .. } => {
                self.alerts.observe(
                    &Signal::SawtoothLeak { node: node_id.clone(), peaks },
                    &self.config,
                    &self.policies,
                );
            }
            trend::LeakSignal::None => {}
        }

        let nodes = self.registry.snapshot();
        let cluster = self.aggregator.cluster(&nodes, self.config.min_healthy_nodes);
        if cluster.mean_cpu > self.config.cluster_wide_cpu_threshold {
            self.alerts.observe(
                &Signal::ClusterCpuPressure { mean_cpu: cluster.mean_cpu },
                &self.config,
                &self.policies,
            );
        }

        // mean_mem from the aggregator is a raw-byte mean, not a percentage,
        // so it can't be compared against cluster_wide_memory_threshold
        // directly — normalize per node against its own capacity first.
        let mem_pcts: Vec<f64> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Healthy)
            .filter_map(|n| {
                n.latest_sample
                    .map(|sample| n.capabilities.memory_pct(sample.memory_used_bytes))
            })
            .collect();
        if !mem_pcts.is_empty() {
            let mean_mem_pct = mem_pcts.iter().sum::<f64>() / mem_pcts.len() as f64;
            if mean_mem_pct > self.config.cluster_wide_memory_threshold {
                self.alerts.observe(
                    &Signal::ClusterMemoryPressure { mean_mem_pct },
                    &self.config,
                    &self.policies,
                );
            }
        }

        Ok(HeartbeatGuidance {
            throttle: self.response_time.should_throttle(),
            degraded: cluster.status != crate::metrics::aggregator::ClusterStatus::Healthy,
        })
    }

    #[tracing::instrument(skip(self, request))]
    pub fn dispatch(&self, request: &Request) -> ClusterResult<NodeId> {
        self.ensure_running()?;

        let nodes = self.registry.snapshot();
        let cluster = self.aggregator.cluster(&nodes, self.config.min_healthy_nodes);
        if cluster.healthy_count < self.config.min_healthy_nodes {
            return Err(ClusterError::ClusterUnhealthy {
                healthy: cluster.healthy_count,
                min_required: self.config.min_healthy_nodes,
            });
        }
        if self.response_time.should_throttle() {
            return Err(ClusterError::Throttled);
        }

        self.dispatcher
            .dispatch(request, self.config.load_balancing_strategy)
            .ok_or(ClusterError::NoCandidate)
    }

    pub fn release(&self, node_id: &NodeId) {
        self.dispatcher.release(node_id);
    }

    pub fn cluster_health(&self) -> ClusterAggregate {
        let nodes = self.registry.snapshot();
        self.aggregator.cluster(&nodes, self.config.min_healthy_nodes)
    }

    pub fn node_view(&self, node_id: &NodeId) -> ClusterResult<NodeEntry> {
        self.registry
            .get(node_id)
            .ok_or_else(|| ClusterError::NotRegistered(node_id.to_string()))
    }

    pub fn subscribe_alerts(&self, handler: impl Fn(&Alert) + Send + Sync + 'static) -> SubscriptionToken {
        self.alerts.subscribe(handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.alerts.unsubscribe(token);
    }

    pub fn backoff(&self) -> &BackoffCoordinator {
        &self.backoff
    }

    /// Records one completed request's duration against the response-time
    /// sliding window, feeding `should_throttle` and future `dispatch`
    /// admission decisions.
    pub fn record_response_time(&self, duration: Duration) {
        self.response_time.record(duration);
    }

    /// Effective concurrency limit right now: ramped during warmup, then
    /// snapped to the steady-state `base_limit`.
    pub fn concurrency_limit(&self) -> u32 {
        self.response_time.concurrency_limit()
    }

    /// Snapshot of every currently-Active alert.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active()
    }

    /// Cancels all periodic tasks, awaits their termination up to
    /// `SHUTDOWN_GRACE`, and marks every subsequent operation `Canceled`.
    /// Outstanding dispatches are not canceled — they drain; only new
    /// dispatches are refused from this point on.
    pub async fn close(&self) {
        self.cancellation.cancel();
        self.stopped.store(true, Ordering::Release);

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
            std::mem::take(&mut *tasks)
        };
        let join_all = futures::future::join_all(handles);
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
            tracing::warn!("periodic tasks did not terminate within the shutdown grace period");
        }
    }
}
