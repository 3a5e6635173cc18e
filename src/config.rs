//! Cluster configuration: the recognized keys from §6, layered defaults,
//! and validation at construction time.

use crate::error::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Load-balancing strategy selected for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastConnections,
    ResourceAware,
    Predictive,
}

/// Response-time controller knobs (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTimeConfig {
    pub target: Duration,
    pub sliding_window: Duration,
    pub min_samples: usize,
    pub slow_pct_threshold: f64,
    pub consecutive_slow_threshold: u32,
    pub warmup_period: Duration,
    pub warmup_multiplier: f64,
    pub base_limit: u32,
}

impl Default for ResponseTimeConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(500),
            sliding_window: Duration::from_secs(300),
            min_samples: 20,
            slow_pct_threshold: 0.25,
            consecutive_slow_threshold: 5,
            warmup_period: Duration::from_secs(60),
            warmup_multiplier: 0.5,
            base_limit: 100,
        }
    }
}

/// Backoff coordinator knobs (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial: Duration,
    pub max_backoff: Duration,
    pub idle_ttl: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            initial: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            idle_ttl: Duration::from_secs(600),
        }
    }
}

/// Alert manager knobs (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub aggregation_window: Duration,
    pub max_alerts_per_window: u32,
    pub trend_analysis_window: Duration,
    pub rate_of_change_threshold: f64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            aggregation_window: Duration::from_secs(10),
            max_alerts_per_window: 2,
            trend_analysis_window: Duration::from_secs(600),
            rate_of_change_threshold: 0.1,
        }
    }
}

/// Retention knobs for windowed series and archived alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub metrics_window: Duration,
    pub alert_history_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics_window: Duration::from_secs(24 * 3600),
            alert_history_days: 7,
        }
    }
}

/// Top-level configuration object. Constructed once, validated, and
/// immutable for the lifetime of a `ClusterMonitor`.
///
/// `failover_timeout` and `node_health_check_interval · node_failure_threshold`
/// are deliberately independent knobs — no implicit coupling between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub enable_distributed_monitoring: bool,
    pub node_health_check_interval: Duration,
    pub node_failure_threshold: u32,
    pub min_healthy_nodes: usize,
    pub enable_automatic_failover: bool,
    pub failover_timeout: Duration,
    pub load_balancing_strategy: LoadBalancingStrategy,
    pub cluster_wide_cpu_threshold: f64,
    pub cluster_wide_memory_threshold: f64,
    pub memory_pressure_threshold: f64,
    pub leak_confidence_threshold: f64,
    pub prediction_horizon: Duration,
    pub resync_interval: Duration,
    pub response_time: ResponseTimeConfig,
    pub backoff: BackoffConfig,
    pub alerting: AlertingConfig,
    pub retention: RetentionConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enable_distributed_monitoring: true,
            node_health_check_interval: Duration::from_secs(1),
            node_failure_threshold: 3,
            min_healthy_nodes: 1,
            enable_automatic_failover: false,
            failover_timeout: Duration::from_secs(5),
            load_balancing_strategy: LoadBalancingStrategy::ResourceAware,
            cluster_wide_cpu_threshold: 85.0,
            cluster_wide_memory_threshold: 85.0,
            memory_pressure_threshold: 0.85,
            leak_confidence_threshold: 0.9,
            prediction_horizon: Duration::from_secs(30),
            resync_interval: Duration::from_secs(60),
            response_time: ResponseTimeConfig::default(),
            backoff: BackoffConfig::default(),
            alerting: AlertingConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Rejects out-of-range values. Called once at `ClusterMonitor::new`.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.node_health_check_interval.is_zero() {
            return Err(ClusterError::ConfigInvalid(
                "node_health_check_interval must be positive".into(),
            ));
        }
        if self.node_failure_threshold == 0 {
            return Err(ClusterError::ConfigInvalid(
                "node_failure_threshold must be positive".into(),
            ));
        }
        if self.min_healthy_nodes == 0 && self.enable_distributed_monitoring {
            return Err(ClusterError::ConfigInvalid(
                "min_healthy_nodes must be positive when distributed monitoring is enabled"
                    .into(),
            ));
        }
        for (name, v) in [
            ("memory_pressure_threshold", self.memory_pressure_threshold),
            ("leak_confidence_threshold", self.leak_confidence_threshold),
            (
                "response_time.slow_pct_threshold",
                self.response_time.slow_pct_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ClusterError::ConfigInvalid(format!(
                    "{name} must be within [0, 1], got {v}"
                )));
            }
        }
        if self.backoff.max_retries == 0 {
            return Err(ClusterError::ConfigInvalid(
                "backoff.max_retries must be positive".into(),
            ));
        }
        if self.backoff.initial.is_zero() {
            return Err(ClusterError::ConfigInvalid(
                "backoff.initial must be positive".into(),
            ));
        }
        if self.alerting.max_alerts_per_window == 0 {
            return Err(ClusterError::ConfigInvalid(
                "alerting.max_alerts_per_window must be positive".into(),
            ));
        }
        if self.response_time.base_limit == 0 {
            return Err(ClusterError::ConfigInvalid(
                "response_time.base_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}
