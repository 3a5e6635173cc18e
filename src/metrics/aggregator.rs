//! C7: MetricsAggregator — per-node windows, cluster-wide aggregates, and
//! named percentile series for the external dashboard.

use crate::metrics::buffer::{MetricKind, MetricsBuffer, ScalarWindow};
use crate::model::{NodeId, NodeStatus, NodeView, ResourceSample};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Overall cluster posture, driven by `healthyCount` against
/// `minHealthyNodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterAggregate {
    pub healthy_count: usize,
    pub total_count: usize,
    pub mean_cpu: f64,
    pub mean_mem: f64,
    pub mean_disk_io: f64,
    pub status: ClusterStatus,
}

#[derive(Default)]
struct ClusterSums {
    cpu: f64,
    mem: f64,
    disk: f64,
    count: u64,
}

pub struct MetricsAggregator {
    node_series: DashMap<NodeId, Arc<MetricsBuffer>>,
    middleware_series: DashMap<String, Arc<ScalarWindow>>,
    sums: Mutex<ClusterSums>,
    buffer_capacity: usize,
    metrics_window: Duration,
}

impl MetricsAggregator {
    pub fn new(buffer_capacity: usize, metrics_window: Duration) -> Self {
        Self {
            node_series: DashMap::new(),
            middleware_series: DashMap::new(),
            sums: Mutex::new(ClusterSums::default()),
            buffer_capacity,
            metrics_window,
        }
    }

    /// Appends to the per-node window and folds the sample into the
    /// incrementally-maintained cluster sums.
    pub fn publish(&self, node_id: &NodeId, sample: ResourceSample) {
        let buf = self
            .node_series
            .entry(node_id.clone())
            .or_insert_with(|| Arc::new(MetricsBuffer::new(self.buffer_capacity, self.metrics_window)));
        buf.append(sample);

        let mut sums = self.sums.lock();
        sums.cpu += sample.cpu_pct;
        sums.mem += sample.memory_used_bytes as f64;
        sums.disk += sample.disk_io_bytes_per_sec;
        sums.count += 1;
    }

    /// Recomputes the cluster sums from scratch against the authoritative
    /// registry snapshot, bounding the float drift the incremental
    /// `publish` updates accumulate between resyncs.
    pub fn resync(&self, nodes: &[NodeView]) {
        let mut fresh = ClusterSums::default();
        for node in nodes {
            if node.status != NodeStatus::Healthy {
                continue;
            }
            if let Some(sample) = node.latest_sample {
                fresh.cpu += sample.cpu_pct;
                fresh.mem += sample.memory_used_bytes as f64;
                fresh.disk += sample.disk_io_bytes_per_sec;
                fresh.count += 1;
            }
        }
        *self.sums.lock() = fresh;
    }

    /// Cluster-wide aggregate. `healthy_count`/`total_count`/`status` are
    /// computed fresh from `nodes` every call; the means come from the
    /// incrementally-maintained sums (see `resync`).
    pub fn cluster(&self, nodes: &[NodeView], min_healthy_nodes: usize) -> ClusterAggregate {
        let healthy_count = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Healthy)
            .count();
        let total_count = nodes.len();

        let sums = self.sums.lock();
        let denom = sums.count.max(1) as f64;
        let (mean_cpu, mean_mem, mean_disk_io) = if sums.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (sums.cpu / denom, sums.mem / denom, sums.disk / denom)
        };

        let status = if healthy_count == 0 {
            ClusterStatus::Critical
        } else if healthy_count >= min_healthy_nodes {
            ClusterStatus::Healthy
        } else {
            ClusterStatus::Degraded
        };

        ClusterAggregate {
            healthy_count,
            total_count,
            mean_cpu,
            mean_mem,
            mean_disk_io,
            status,
        }
    }

    /// Handle to a node's windowed series, for TrendAnalyzer consumption.
    pub fn node_series(&self, node_id: &NodeId) -> Option<Arc<MetricsBuffer>> {
        self.node_series.get(node_id).map(|entry| entry.clone())
    }

    pub fn node_metric(&self, node_id: &NodeId, metric: MetricKind) -> Vec<(std::time::Instant, f64)> {
        self.node_series(node_id)
            .map(|buf| buf.scalar_series(metric))
            .unwrap_or_default()
    }

    /// Records one execution-time sample under a middleware name, for the
    /// external dashboard's percentile view.
    pub fn record_duration(&self, middleware: &str, duration: Duration) {
        let window = self
            .middleware_series
            .entry(middleware.to_string())
            .or_insert_with(|| Arc::new(ScalarWindow::new(self.buffer_capacity, self.metrics_window)));
        window.append(duration.as_secs_f64() * 1000.0);
    }

    /// p50/p95/p99 (in ms) of execution times recorded under `middleware`.
    pub fn percentiles(&self, middleware: &str) -> [f64; 3] {
        match self.middleware_series.get(middleware) {
            Some(window) => {
                let v = window.percentiles(&[50.0, 95.0, 99.0]);
                [v[0], v[1], v[2]]
            }
            None => [0.0, 0.0, 0.0],
        }
    }
}
