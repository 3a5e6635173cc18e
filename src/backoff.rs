//! C9: BackoffCoordinator — per-operation exponential backoff with jitter
//! and a retry budget.
//!
//! Delays come from a table precomputed once at construction
//! (`initial * 2^k`, capped at `maxBackoff`) rather than calling
//! `powf`/`pow` per retry, avoiding float overflow for large retry counts.

use crate::config::BackoffConfig;
use dashmap::DashMap;
use rand::Rng;
use std::time::{Duration, Instant};

/// Coarse classification of the error that triggered a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Canceled,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    Retry { delay: Duration },
    GiveUp,
}

struct OpState {
    retry_count: u32,
    last_attempt_at: Instant,
}

pub struct BackoffCoordinator {
    states: DashMap<String, OpState>,
    table: Vec<Duration>,
    max_retries: u32,
    idle_ttl: Duration,
    jitter_enabled: bool,
}

impl BackoffCoordinator {
    pub fn new(config: &BackoffConfig) -> Self {
        let table = (0..config.max_retries)
            .map(|k| {
                let scaled = config.initial.as_secs_f64() * 2f64.powi(k as i32);
                Duration::from_secs_f64(scaled).min(config.max_backoff)
            })
            .collect();
        Self {
            states: DashMap::new(),
            table,
            max_retries: config.max_retries,
            idle_ttl: config.idle_ttl,
            jitter_enabled: true,
        }
    }

    /// Test-only: disables jitter so delays are exactly the table values.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    pub fn should_retry(&self, op_id: &str, error_class: ErrorClass) -> BackoffDecision {
        if matches!(error_class, ErrorClass::Canceled | ErrorClass::Disposed) {
            self.states.remove(op_id);
            return BackoffDecision::GiveUp;
        }

        let mut entry = self
            .states
            .entry(op_id.to_string())
            .or_insert_with(|| OpState {
                retry_count: 0,
                last_attempt_at: Instant::now(),
            });

        if entry.retry_count >= self.max_retries {
            drop(entry);
            self.states.remove(op_id);
            return BackoffDecision::GiveUp;
        }

        entry.retry_count += 1;
        entry.last_attempt_at = Instant::now();
        let k = (entry.retry_count - 1) as usize;
        let base = self.table[k.min(self.table.len() - 1)];

        let delay = if self.jitter_enabled {
            let jitter = rand::thread_rng().gen_range(0.85..=1.15);
            Duration::from_secs_f64(base.as_secs_f64() * jitter)
        } else {
            base
        };

        BackoffDecision::Retry { delay }
    }

    pub fn reset(&self, op_id: &str) {
        self.states.remove(op_id);
    }

    /// Drops per-operation state untouched for `idleTtl`, preventing
    /// unbounded growth from operations that never retried again.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        self.states
            .retain(|_, state| now.saturating_duration_since(state.last_attempt_at) <= self.idle_ttl);
    }
}
