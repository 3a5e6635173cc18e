//! C6: Dispatcher — selects a target node per request under one of four
//! strategies, and makes `select + incConn` atomic with respect to other
//! concurrent selectors.

use crate::config::LoadBalancingStrategy;
use crate::metrics::aggregator::MetricsAggregator;
use crate::metrics::buffer::MetricKind;
use crate::metrics::trend::MIN_DATA_POINTS_FOR_ANALYSIS;
use crate::model::{NodeId, Request};
use crate::registry::NodeRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Disk I/O is reported in raw bytes/sec (`ResourceSample`) but the
/// ResourceAware score needs a percentage. No capacity field for disk
/// throughput exists on `NodeCapabilities`, so throughput is normalized
/// against this assumed ceiling — an explicit stand-in for the missing
/// capacity dimension, not a measured limit.
const ASSUMED_DISK_IO_CEILING_BYTES_PER_SEC: f64 = 500_000_000.0;

pub struct Dispatcher {
    registry: Arc<NodeRegistry>,
    aggregator: Arc<MetricsAggregator>,
    round_robin_counter: AtomicUsize,
    prediction_horizon: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<NodeRegistry>, aggregator: Arc<MetricsAggregator>, prediction_horizon: Duration) -> Self {
        Self {
            registry,
            aggregator,
            round_robin_counter: AtomicUsize::new(0),
            prediction_horizon,
        }
    }

    fn candidates(&self, request: &Request) -> Vec<crate::model::NodeEntry> {
        let mut candidates = self.registry.snapshot();
        candidates.retain(|e| e.status == crate::model::NodeStatus::Healthy);
        if let Some(kind) = &request.validator_kind {
            candidates.retain(|e| e.capabilities.supported_validators.contains(kind));
        }
        candidates
    }

    fn resource_aware_score(&self, entry: &crate::model::NodeEntry) -> Option<f64> {
        let sample = entry.latest_sample?;
        let mem_pct = entry.capabilities.memory_pct(sample.memory_used_bytes);
        let disk_io_pct =
            (sample.disk_io_bytes_per_sec / ASSUMED_DISK_IO_CEILING_BYTES_PER_SEC * 100.0).min(100.0);
        Some(sample.resource_aware_score(mem_pct, disk_io_pct))
    }

    fn round_robin(&self, candidates: &[crate::model::NodeEntry]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].node_id.clone())
    }

    fn least_connections(&self, candidates: &[crate::model::NodeEntry]) -> Option<NodeId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.live_connections
                    .cmp(&b.live_connections)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
            .map(|e| e.node_id.clone())
    }

    fn resource_aware(&self, candidates: &[crate::model::NodeEntry]) -> Option<NodeId> {
        candidates
            .iter()
            .filter_map(|e| self.resource_aware_score(e).map(|score| (e, score)))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(e, _)| e.node_id.clone())
    }

    fn predictive(&self, candidates: &[crate::model::NodeEntry]) -> Option<NodeId> {
        let mut projected = Vec::with_capacity(candidates.len());
        for entry in candidates {
            let Some(current_score) = self.resource_aware_score(entry) else {
                continue;
            };
            let cpu_series = self.aggregator.node_metric(&entry.node_id, MetricKind::Cpu);
            if cpu_series.len() < MIN_DATA_POINTS_FOR_ANALYSIS {
                // Insufficient history for at least one candidate: fall
                // back to RoundRobin rather than silently delegating to
                // it on every call.
                return self.round_robin(candidates);
            }
            let trend = crate::metrics::trend::analyze(&cpu_series);
            let projected_score = current_score + trend.slope * self.prediction_horizon.as_secs_f64();
            projected.push((entry, projected_score));
        }
        projected
            .into_iter()
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(e, _)| e.node_id.clone())
    }

    /// Pure candidate selection; does not touch connection counters.
    pub fn select(&self, request: &Request, strategy: LoadBalancingStrategy) -> Option<NodeId> {
        let candidates = self.candidates(request);
        if candidates.is_empty() {
            return None;
        }
        match strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(&candidates),
            LoadBalancingStrategy::LeastConnections => self.least_connections(&candidates),
            LoadBalancingStrategy::ResourceAware => self.resource_aware(&candidates),
            LoadBalancingStrategy::Predictive => self.predictive(&candidates),
        }
    }

    /// `select + incConn`, atomic with respect to other concurrent calls:
    /// the registry entry's counter is incremented through the same
    /// per-entry serialization `select` read its connection counts from,
    /// so two concurrent dispatches can never both observe `k` and both
    /// advance to `k+1` without seeing each other.
    pub fn dispatch(&self, request: &Request, strategy: LoadBalancingStrategy) -> Option<NodeId> {
        let node_id = self.select(request, strategy)?;
        self.registry.inc_conn(&node_id).ok()?;
        Some(node_id)
    }

    pub fn release(&self, node_id: &NodeId) {
        let _ = self.registry.dec_conn(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeCapabilities, Priority, RequestId, ResourceSample};
    use std::collections::HashSet;

    fn caps() -> NodeCapabilities {
        NodeCapabilities {
            max_concurrent_jobs: 4,
            cpu_cores: 2,
            memory_bytes: 1000,
            supported_validators: HashSet::new(),
        }
    }

    fn sample(cpu: f64, mem: u64, io: f64) -> ResourceSample {
        ResourceSample {
            cpu_pct: cpu,
            memory_used_bytes: mem,
            disk_io_bytes_per_sec: io,
            network_bytes_per_sec: 0.0,
            active_handles: 0,
            active_connections: 0,
            queue_depth: 0,
        }
    }

    fn request() -> Request {
        Request {
            request_id: RequestId::from("r1"),
            est_cpu: 0.0,
            est_memory_bytes: 0,
            est_duration_ms: 0,
            priority: Priority::Normal,
            validator_kind: None,
        }
    }

    #[test]
    fn resource_aware_prefers_lower_score_and_excludes_sampleless() {
        let registry = Arc::new(NodeRegistry::new());
        registry.register(NodeId::new("a"), caps()).unwrap();
        registry.register(NodeId::new("b"), caps()).unwrap();
        registry.register(NodeId::new("c"), caps()).unwrap();
        registry.heartbeat(&NodeId::new("a"), sample(90.0, 100, 0.0)).unwrap();
        registry.heartbeat(&NodeId::new("b"), sample(20.0, 200, 0.0)).unwrap();
        // c never heartbeats -> no sample -> ineligible

        let aggregator = Arc::new(MetricsAggregator::new(64, Duration::from_secs(3600)));
        let dispatcher = Dispatcher::new(registry, aggregator, Duration::from_secs(30));

        let chosen = dispatcher.select(&request(), LoadBalancingStrategy::ResourceAware);
        assert_eq!(chosen, Some(NodeId::new("b")));
    }

    #[test]
    fn least_connections_breaks_ties_lexicographically() {
        let registry = Arc::new(NodeRegistry::new());
        registry.register(NodeId::new("b"), caps()).unwrap();
        registry.register(NodeId::new("a"), caps()).unwrap();
        let aggregator = Arc::new(MetricsAggregator::new(64, Duration::from_secs(3600)));
        let dispatcher = Dispatcher::new(registry, aggregator, Duration::from_secs(30));
        let chosen = dispatcher.select(&request(), LoadBalancingStrategy::LeastConnections);
        assert_eq!(chosen, Some(NodeId::new("a")));
    }

    #[test]
    fn dispatch_then_release_restores_connection_count() {
        let registry = Arc::new(NodeRegistry::new());
        registry.register(NodeId::new("a"), caps()).unwrap();
        let aggregator = Arc::new(MetricsAggregator::new(64, Duration::from_secs(3600)));
        let dispatcher = Dispatcher::new(registry.clone(), aggregator, Duration::from_secs(30));

        let node = dispatcher
            .dispatch(&request(), LoadBalancingStrategy::RoundRobin)
            .unwrap();
        assert_eq!(registry.get(&node).unwrap().live_connections, 1);
        dispatcher.release(&node);
        assert_eq!(registry.get(&node).unwrap().live_connections, 0);
    }
}
