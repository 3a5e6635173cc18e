//! C3: AlertManager — dedup, rate limiting, severity state machine, and a
//! serialized fan-out to subscribers.
//!
//! The "MemoryLeakPreventionSystem" class hierarchy this component
//! replaces is flattened into a tagged `Signal` and a linear list of pure
//! policy functions, `(Signal, &ClusterConfig) -> Option<Alert>` — detect,
//! classify, and act are three separate, independently testable steps.

use crate::config::ClusterConfig;
use crate::model::NodeId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ARCHIVE_CAP: usize = 1000;
const HANDLER_TIMEOUT: Duration = Duration::from_millis(500);
/// Granularity used only to collapse truly-simultaneous duplicate raises
/// into the same identity; the rate limit itself is tracked separately
/// over the full `aggregationWindow`. Millisecond-scale on purpose: two
/// raises even a few milliseconds apart are distinct occurrences that
/// should each count against the rate limit, not duplicates of the same
/// underlying event.
const IDENTITY_BUCKET: Duration = Duration::from_millis(1);

/// Declaration order is significant: `derive(PartialOrd, Ord)` ranks
/// variants by position, giving `Info < Warning < Critical < Emergency`,
/// which is exactly the ordering severity promotion needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertKind {
    NodeFailure,
    SteadyLeak,
    SawtoothLeak,
    ClusterCpuPressure,
    ClusterMemoryPressure,
    Throttle,
    Custom(String),
}

/// Detect → classify signals fed into the policy pipeline. One variant per
/// condition the core can observe; policies turn these into `Alert`s.
#[derive(Debug, Clone)]
pub enum Signal {
    NodeFailure { node: NodeId },
    SteadyLeak { node: NodeId, rmse: f64 },
    SawtoothLeak { node: NodeId, peaks: usize },
    ClusterCpuPressure { mean_cpu: f64 },
    ClusterMemoryPressure { mean_mem_pct: f64 },
}

/// A pure function of `(Signal, Config) -> Option<Alert>`. No side effects,
/// no shared state — easy to unit test each policy in isolation.
pub type Policy = Box<dyn Fn(&Signal, &ClusterConfig) -> Option<Alert> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub node_id: Option<NodeId>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub metric_kind: Option<String>,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertLifecycle {
    Active,
    Cleared,
}

struct ActiveEntry {
    alert: Alert,
    state: AlertLifecycle,
    bucket: u64,
}

type AlertKey = (AlertKind, Option<NodeId>);

pub type SubscriptionToken = Uuid;
type Handler = Arc<dyn Fn(&Alert) + Send + Sync>;

pub struct AlertManager {
    active: Mutex<HashMap<Uuid, ActiveEntry>>,
    by_key: Mutex<HashMap<AlertKey, Vec<Uuid>>>,
    raise_timestamps: Mutex<HashMap<AlertKey, VecDeque<Instant>>>,
    archive: Mutex<VecDeque<Alert>>,
    subscribers: Mutex<Vec<(SubscriptionToken, Handler)>>,
    deliver_tx: mpsc::UnboundedSender<Alert>,
    aggregation_window: Duration,
    max_alerts_per_window: u32,
}

impl AlertManager {
    pub fn new(aggregation_window: Duration, max_alerts_per_window: u32, shutdown: CancellationToken) -> Arc<Self> {
        let (deliver_tx, mut deliver_rx) = mpsc::unbounded_channel::<Alert>();
        let manager = Arc::new(Self {
            active: Mutex::new(HashMap::new()),
            by_key: Mutex::new(HashMap::new()),
            raise_timestamps: Mutex::new(HashMap::new()),
            archive: Mutex::new(VecDeque::new()),
            subscribers: Mutex::new(Vec::new()),
            deliver_tx,
            aggregation_window,
            max_alerts_per_window,
        });

        let delivery_manager = manager.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    maybe_alert = deliver_rx.recv() => {
                        match maybe_alert {
                            Some(alert) => delivery_manager.deliver(alert).await,
                            None => break,
                        }
                    }
                }
            }
        });

        manager
    }

    async fn deliver(&self, alert: Alert) {
        let subscribers: Vec<(SubscriptionToken, Handler)> = self.subscribers.lock().clone();
        for (_token, handler) in subscribers {
            let alert_clone = alert.clone();
            let handler_clone = handler.clone();
            let call = tokio::task::spawn_blocking(move || {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler_clone(&alert_clone)
                }));
            });
            if tokio::time::timeout(HANDLER_TIMEOUT, call).await.is_err() {
                tracing::warn!(alert_id = %alert.id, "alert subscriber timed out, skipping");
            }
        }
    }

    pub fn subscribe(&self, handler: impl Fn(&Alert) + Send + Sync + 'static) -> SubscriptionToken {
        let token = Uuid::new_v4();
        self.subscribers.lock().push((token, Arc::new(handler)));
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.lock().retain(|(t, _)| *t != token);
    }

    fn bucket_of(now: Instant, epoch: Instant) -> u64 {
        now.saturating_duration_since(epoch).as_millis() as u64 / IDENTITY_BUCKET.as_millis() as u64
    }

    /// Raises an alert, applying dedup, the per-(kind, node) rate limit,
    /// and severity promotion. Returns the id of the Active alert this
    /// raise affected (whether newly created, refreshed, or promoted).
    pub fn raise(&self, mut alert: Alert) -> Uuid {
        static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let epoch = *EPOCH.get_or_init(Instant::now);
        let now = Instant::now();
        let key: AlertKey = (alert.kind.clone(), alert.node_id.clone());
        let bucket = Self::bucket_of(now, epoch);

        let mut by_key = self.by_key.lock();
        let mut active = self.active.lock();
        let ids = by_key.entry(key.clone()).or_default();

        // Exact identity match (same kind/node/bucket): idempotent refresh,
        // only on strict severity increase.
        if let Some(existing_id) = ids
            .iter()
            .find(|id| active.get(*id).map(|e| e.bucket) == Some(bucket))
            .copied()
        {
            let entry = active.get_mut(&existing_id).expect("indexed id must exist");
            if alert.severity > entry.alert.severity {
                entry.alert.severity = alert.severity;
                entry.alert.value = alert.value;
                entry.alert.created_at = alert.created_at;
            }
            return existing_id;
        }

        let mut timestamps = self.raise_timestamps.lock();
        let window = timestamps.entry(key.clone()).or_default();
        while let Some(front) = window.front() {
            if now.saturating_duration_since(*front) > self.aggregation_window {
                window.pop_front();
            } else {
                break;
            }
        }

        if (window.len() as u32) < self.max_alerts_per_window {
            window.push_back(now);
            alert.id = Uuid::new_v4();
            let id = alert.id;
            ids.push(id);
            active.insert(
                id,
                ActiveEntry {
                    alert: alert.clone(),
                    state: AlertLifecycle::Active,
                    bucket,
                },
            );
            drop(timestamps);
            drop(active);
            drop(by_key);
            let _ = self.deliver_tx.send(alert);
            return id;
        }

        // Rate-limited: only a strict severity increase over the weakest
        // currently-active entry for this key is allowed through, and it
        // promotes that entry rather than minting a new one. An Emergency
        // is never silently dropped.
        let weakest_id = ids
            .iter()
            .min_by_key(|id| active.get(*id).map(|e| e.alert.severity).unwrap_or(AlertSeverity::Info))
            .copied();
        if let Some(weakest_id) = weakest_id {
            let entry = active.get_mut(&weakest_id).expect("indexed id must exist");
            if alert.severity > entry.alert.severity {
                entry.alert.severity = alert.severity;
                entry.alert.value = alert.value;
                entry.alert.created_at = alert.created_at;
                entry.alert.message = alert.message.clone();
                let promoted = entry.alert.clone();
                drop(timestamps);
                drop(active);
                drop(by_key);
                let _ = self.deliver_tx.send(promoted);
                return weakest_id;
            }
            weakest_id
        } else {
            Uuid::nil()
        }
    }

    /// Runs a `Signal` through the policy pipeline and raises the first
    /// alert a policy produces.
    pub fn observe(&self, signal: &Signal, config: &ClusterConfig, policies: &[Policy]) -> Option<Uuid> {
        for policy in policies {
            if let Some(alert) = policy(signal, config) {
                return Some(self.raise(alert));
            }
        }
        None
    }

    pub fn clear(&self, alert_id: Uuid) {
        // Lock order must match `raise()` (by_key then active) to avoid an
        // AB-BA deadlock between concurrent raise/clear callers.
        let mut by_key = self.by_key.lock();
        let mut active = self.active.lock();
        if let Some(mut entry) = active.remove(&alert_id) {
            entry.state = AlertLifecycle::Cleared;
            let key: AlertKey = (entry.alert.kind.clone(), entry.alert.node_id.clone());
            if let Some(ids) = by_key.get_mut(&key) {
                ids.retain(|id| *id != alert_id);
            }
            drop(active);
            drop(by_key);
            let mut archive = self.archive.lock();
            archive.push_back(entry.alert);
            while archive.len() > ARCHIVE_CAP {
                archive.pop_front();
            }
        }
    }

    /// Moves any Active alert older than `retention` into the archive.
    /// Part of the C10 periodic archival sweep.
    pub fn archive_expired(&self, retention: Duration) {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let expired: Vec<Uuid> = self
            .active
            .lock()
            .iter()
            .filter(|(_, entry)| entry.alert.created_at < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.clear(id);
        }
    }

    pub fn active(&self) -> Vec<Alert> {
        self.active.lock().values().map(|e| e.alert.clone()).collect()
    }

    pub fn historical(&self, limit: Option<usize>) -> Vec<Alert> {
        let archive = self.archive.lock();
        match limit {
            Some(n) => archive.iter().rev().take(n).cloned().collect(),
            None => archive.iter().cloned().collect(),
        }
    }
}

/// Default policy set: one pure function per condition, matching the
/// thresholds on `ClusterConfig`.
pub fn default_policies() -> Vec<Policy> {
    vec![
        Box::new(|signal, _config| match signal {
            Signal::NodeFailure { node } => Some(Alert {
                id: Uuid::nil(),
                node_id: Some(node.clone()),
                kind: AlertKind::NodeFailure,
                severity: AlertSeverity::Critical,
                metric_kind: None,
                value: 0.0,
                threshold: 0.0,
                message: format!("node {node} failed heartbeat threshold"),
                created_at: Utc::now(),
            }),
            _ => None,
        }),
        Box::new(|signal, config| match signal {
            Signal::SteadyLeak { node, rmse } if *rmse < config.leak_confidence_threshold.max(0.1) => {
                Some(Alert {
                    id: Uuid::nil(),
                    node_id: Some(node.clone()),
                    kind: AlertKind::SteadyLeak,
                    severity: AlertSeverity::Emergency,
                    metric_kind: Some("memory".to_string()),
                    value: *rmse,
                    threshold: config.leak_confidence_threshold,
                    message: format!("steady memory leak detected on {node}"),
                    created_at: Utc::now(),
                })
            }
            _ => None,
        }),
        Box::new(|signal, _config| match signal {
            Signal::SawtoothLeak { node, peaks } => Some(Alert {
                id: Uuid::nil(),
                node_id: Some(node.clone()),
                kind: AlertKind::SawtoothLeak,
                severity: AlertSeverity::Warning,
                metric_kind: Some("memory".to_string()),
                value: *peaks as f64,
                threshold: 3.0,
                message: format!("sawtooth memory pattern detected on {node}"),
                created_at: Utc::now(),
            }),
            _ => None,
        }),
        Box::new(|signal, config| match signal {
            Signal::ClusterCpuPressure { mean_cpu } if *mean_cpu > config.cluster_wide_cpu_threshold => {
                Some(Alert {
                    id: Uuid::nil(),
                    node_id: None,
                    kind: AlertKind::ClusterCpuPressure,
                    severity: AlertSeverity::Warning,
                    metric_kind: Some("cpu".to_string()),
                    value: *mean_cpu,
                    threshold: config.cluster_wide_cpu_threshold,
                    message: "cluster-wide CPU pressure".to_string(),
                    created_at: Utc::now(),
                })
            }
            _ => None,
        }),
        Box::new(|signal, config| match signal {
            Signal::ClusterMemoryPressure { mean_mem_pct }
                if *mean_mem_pct > config.cluster_wide_memory_threshold =>
            {
                Some(Alert {
                    id: Uuid::nil(),
                    node_id: None,
                    kind: AlertKind::ClusterMemoryPressure,
                    severity: AlertSeverity::Warning,
                    metric_kind: Some("memory".to_string()),
                    value: *mean_mem_pct,
                    threshold: config.cluster_wide_memory_threshold,
                    message: "cluster-wide memory pressure".to_string(),
                    created_at: Utc::now(),
                })
            }
            _ => None,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(node: &str) -> Alert {
        Alert {
            id: Uuid::nil(),
            node_id: Some(NodeId::new(node)),
            kind: AlertKind::ClusterCpuPressure,
            severity: AlertSeverity::Warning,
            metric_kind: None,
            value: 1.0,
            threshold: 0.0,
            message: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rate_limit_caps_active_alerts_per_key() {
        let manager = AlertManager::new(Duration::from_secs(10), 2, CancellationToken::new());
        for _ in 0..5 {
            manager.raise(warning("n1"));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.active().len(), 2);
    }

    #[tokio::test]
    async fn emergency_promotes_rate_limited_key_instead_of_dropping() {
        let manager = AlertManager::new(Duration::from_secs(10), 2, CancellationToken::new());
        for _ in 0..3 {
            manager.raise(warning("n1"));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let mut emergency = warning("n1");
        emergency.severity = AlertSeverity::Emergency;
        manager.raise(emergency);

        let active = manager.active();
        assert_eq!(active.len(), 2);
        assert!(active.iter().any(|a| a.severity == AlertSeverity::Emergency));
    }

    #[tokio::test]
    async fn clear_moves_alert_to_archive() {
        let manager = AlertManager::new(Duration::from_secs(10), 2, CancellationToken::new());
        let id = manager.raise(warning("n1"));
        manager.clear(id);
        assert!(manager.active().is_empty());
        assert_eq!(manager.historical(None).len(), 1);
    }
}
