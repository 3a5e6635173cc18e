//! End-to-end scenarios wiring multiple components together, mirroring
//! the worked examples worked through during design. Every scenario that
//! exercises node/alert/dispatch state drives the public `ClusterMonitor`
//! facade rather than its internal components.
//!
//! `ClusterMonitor` and everything it owns (registry, failure detector,
//! response-time controller) bookkeep wall-clock time with
//! `std::time::Instant`, which `tokio::time::pause()`/`advance()` has no
//! effect on — only `tokio::time::Instant`/`sleep` observe the paused
//! clock. So these scenarios use real sleeps, scaled down in magnitude
//! from the worked examples (the ratios between them are preserved) so
//! the suite stays fast without changing which branch of each decision
//! fires.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use vcs_control_plane::alerting::AlertSeverity;
use vcs_control_plane::backoff::{BackoffCoordinator, BackoffDecision, ErrorClass};
use vcs_control_plane::cluster_monitor::ClusterMonitor;
use vcs_control_plane::config::{BackoffConfig, ClusterConfig, LoadBalancingStrategy, ResponseTimeConfig};
use vcs_control_plane::error::ClusterError;
use vcs_control_plane::model::{NodeCapabilities, NodeId, NodeStatus, Priority, Request, RequestId, ResourceSample};

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

/// S1: a node that stops heartbeating gets marked Failed, becomes
/// invisible to Dispatch, and resurrects on its next successful
/// heartbeat.
#[tokio::test]
async fn s1_failure_detection_and_resurrection() {
    let mut config = ClusterConfig::default();
    config.load_balancing_strategy = LoadBalancingStrategy::RoundRobin;
    config.node_health_check_interval = Duration::from_millis(10);
    config.node_failure_threshold = 3;
    let monitor = ClusterMonitor::new(config, None).unwrap();

    let a = NodeId::new("a");
    let b = NodeId::new("b");
    monitor.register_node(a.clone(), caps()).unwrap();
    monitor.register_node(b.clone(), caps()).unwrap();
    monitor.heartbeat(&a, sample(10.0, 0, 0.0)).unwrap();
    monitor.heartbeat(&b, sample(10.0, 0, 0.0)).unwrap();

    // Keep A alive, let B go stale past threshold * interval; the periodic
    // detector task spun up by `ClusterMonitor::new` drives the sweep.
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.heartbeat(&a, sample(10.0, 0, 0.0)).unwrap();
    }

    assert_eq!(monitor.node_view(&b).unwrap().status, NodeStatus::Failed);
    assert_eq!(monitor.active_alerts().len(), 1);

    for _ in 0..5 {
        let chosen = monitor.dispatch(&request()).unwrap();
        assert_eq!(chosen, a);
        monitor.release(&chosen);
    }

    monitor.heartbeat(&b, sample(10.0, 0, 0.0)).unwrap();
    assert_eq!(monitor.node_view(&b).unwrap().status, NodeStatus::Healthy);

    monitor.close().await;
}

/// S2: ResourceAware selects the lowest-score candidate and excludes a
/// node that has never reported a sample.
#[tokio::test]
async fn s2_resource_aware_selection() {
    let config = ClusterConfig::default(); // ResourceAware by default
    let monitor = ClusterMonitor::new(config, None).unwrap();

    let a = NodeId::new("a");
    let b = NodeId::new("b");
    let c = NodeId::new("c");
    monitor.register_node(a.clone(), caps()).unwrap();
    monitor.register_node(b.clone(), caps()).unwrap();
    monitor.register_node(c.clone(), caps()).unwrap();
    monitor.heartbeat(&a, sample(90.0, 100, 10.0)).unwrap();
    monitor.heartbeat(&b, sample(20.0, 200, 20.0)).unwrap();
    // c never heartbeats.

    let chosen = monitor.dispatch(&request()).unwrap();
    assert_eq!(chosen, b);

    monitor.close().await;
}

/// S3: repeated cluster-wide CPU pressure raised under the same
/// `(ClusterCpuPressure, None)` key caps at `max_alerts_per_window` active
/// alerts, driven purely through real heartbeats. Severity promotion of a
/// rate-limited key is a property of `AlertManager::raise` itself — no
/// default policy re-raises the same kind at a different severity, so it
/// can't be triggered through `heartbeat()` alone — and is covered
/// directly in `src/alerting.rs`'s unit tests.
#[tokio::test]
async fn s3_dedup_and_rate_limit_via_heartbeat() {
    let mut config = ClusterConfig::default();
    config.cluster_wide_cpu_threshold = 1.0;
    config.alerting.aggregation_window = Duration::from_secs(10);
    config.alerting.max_alerts_per_window = 2;
    let monitor = ClusterMonitor::new(config, None).unwrap();

    let node = NodeId::new("n1");
    monitor.register_node(node.clone(), caps()).unwrap();
    for _ in 0..5 {
        monitor.heartbeat(&node, sample(50.0, 0, 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let active = monitor.active_alerts();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|a| a.severity == AlertSeverity::Warning));

    monitor.close().await;
}

/// S4: warmup ramps linearly, and once enough slow samples accumulate
/// past the threshold, Dispatch refuses new work regardless of resources.
#[tokio::test]
async fn s4_throttle_and_warmup_ramp() {
    let mut config = ClusterConfig::default();
    config.response_time = ResponseTimeConfig {
        target: Duration::from_millis(50),
        sliding_window: Duration::from_secs(300),
        min_samples: 20,
        slow_pct_threshold: 0.25,
        consecutive_slow_threshold: 100,
        warmup_period: Duration::from_millis(100),
        warmup_multiplier: 0.5,
        base_limit: 100,
    };
    let monitor = ClusterMonitor::new(config, None).unwrap();
    let node = NodeId::new("a");
    monitor.register_node(node.clone(), caps()).unwrap();
    monitor.heartbeat(&node, sample(10.0, 0, 0.0)).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(monitor.concurrency_limit() < 100, "expected a ramped, not steady-state, limit");

    for _ in 0..140 {
        monitor.record_response_time(Duration::from_millis(100));
    }
    for _ in 0..60 {
        monitor.record_response_time(Duration::from_millis(10));
    }
    let err = monitor.dispatch(&request()).unwrap_err();
    assert!(matches!(err, ClusterError::Throttled));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(monitor.concurrency_limit(), 100);

    monitor.close().await;
}

/// S5: backoff delays follow the doubling table and cap, giving up after
/// the retry budget is exhausted. A pure deterministic property of
/// `BackoffCoordinator` with jitter disabled, so this exercises the
/// component directly rather than through the facade (which never
/// disables jitter).
#[test]
fn s5_backoff_doubling_table_then_give_up() {
    let config = BackoffConfig {
        max_retries: 6,
        initial: Duration::from_secs(1),
        max_backoff: Duration::from_secs(30),
        idle_ttl: Duration::from_secs(600),
    };
    let coordinator = BackoffCoordinator::new(&config).with_jitter(false);
    let expected = [1, 2, 4, 8, 16, 30];
    for exp in expected {
        match coordinator.should_retry("op", ErrorClass::Retryable) {
            BackoffDecision::Retry { delay } => assert_eq!(delay, Duration::from_secs(exp)),
            BackoffDecision::GiveUp => panic!("expected a retry at this step"),
        }
    }
    assert_eq!(
        coordinator.should_retry("op", ErrorClass::Retryable),
        BackoffDecision::GiveUp
    );
}

/// S6: a pure linear memory series is classified a steady leak and
/// raises exactly one Emergency alert under dedup, surfaced through real
/// heartbeats into the public facade.
#[tokio::test]
async fn s6_steady_leak_raises_one_emergency() {
    let mut config = ClusterConfig::default();
    // The leak condition stays true on every heartbeat once enough history
    // accumulates, so each tick is a fresh raise a millisecond-scale dedup
    // bucket won't collapse; cap the window at 1 so repeating the same
    // still-true condition yields exactly one active alert.
    config.alerting.max_alerts_per_window = 1;
    let monitor = Arc::new(ClusterMonitor::new(config, None).unwrap());
    let node = NodeId::new("leaky");
    // Capacity large enough that the memory series driving the leak signal
    // never also crosses `cluster_wide_memory_threshold`, which would
    // otherwise raise unrelated ClusterMemoryPressure alerts alongside it.
    let mut large_capacity = caps();
    large_capacity.memory_bytes = 1_000_000;
    monitor.register_node(node.clone(), large_capacity).unwrap();

    for i in 0..21u64 {
        monitor.heartbeat(&node, sample(0.0, 100 * (i + 1), 0.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let active = monitor.active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].severity, AlertSeverity::Emergency);

    monitor.close().await;
}
