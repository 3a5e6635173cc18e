//! C8: ResponseTimeController — sliding-window latency analysis driving
//! the throttle decision, plus the post-startup warmup concurrency ramp.

use crate::config::ResponseTimeConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTimeStats {
    pub avg: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub slow_pct: f64,
    pub max_consecutive_slow: u32,
    pub total: usize,
    pub slow: usize,
}

pub struct ResponseTimeController {
    window: Mutex<VecDeque<(Instant, Duration)>>,
    config: ResponseTimeConfig,
    start_time: Instant,
}

impl ResponseTimeController {
    pub fn new(config: ResponseTimeConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            config,
            start_time: Instant::now(),
        }
    }

    /// Records one completed request's duration.
    pub fn record(&self, duration: Duration) {
        let now = Instant::now();
        let mut window = self.window.lock();
        window.push_back((now, duration));
        Self::trim(&mut window, now, self.config.sliding_window);
    }

    fn trim(window: &mut VecDeque<(Instant, Duration)>, now: Instant, retention: Duration) {
        while let Some((ts, _)) = window.front() {
            if now.saturating_duration_since(*ts) > retention {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Sliding-window stats, computed fresh from the current snapshot every
    /// call — cheap enough at expected sample counts, and guarantees
    /// `shouldThrottle` idempotence between calls with no intervening
    /// `record`.
    pub fn stats(&self) -> ResponseTimeStats {
        let now = Instant::now();
        let mut window = self.window.lock();
        Self::trim(&mut window, now, self.config.sliding_window);
        let durations: Vec<Duration> = window.iter().map(|(_, d)| *d).collect();
        drop(window);

        if durations.is_empty() {
            return ResponseTimeStats::default();
        }

        let total = durations.len();
        let slow_flags: Vec<bool> = durations.iter().map(|d| *d > self.config.target).collect();
        let slow = slow_flags.iter().filter(|s| **s).count();

        let mut max_run = 0u32;
        let mut run = 0u32;
        for slow_flag in &slow_flags {
            if *slow_flag {
                run += 1;
                max_run = max_run.max(run);
            } else {
                run = 0;
            }
        }

        let sum: Duration = durations.iter().sum();
        let avg = sum / total as u32;

        let mut sorted = durations.clone();
        sorted.sort();
        let p95 = percentile(&sorted, 95.0);
        let p99 = percentile(&sorted, 99.0);

        ResponseTimeStats {
            avg,
            p95,
            p99,
            slow_pct: slow as f64 / total as f64,
            max_consecutive_slow: max_run,
            total,
            slow,
        }
    }

    /// `(samples >= minSamplesForAnalysis) && (slowPct > threshold ||
    /// maxConsecutiveSlow >= threshold)`.
    pub fn should_throttle(&self) -> bool {
        let stats = self.stats();
        if stats.total < self.config.min_samples {
            return false;
        }
        stats.slow_pct > self.config.slow_pct_threshold
            || stats.max_consecutive_slow >= self.config.consecutive_slow_threshold
    }

    /// Forces the sliding window to drop stale entries even when no new
    /// sample arrives, so idle periods don't hold onto memory.
    pub fn trim_now(&self) {
        let now = Instant::now();
        let mut window = self.window.lock();
        Self::trim(&mut window, now, self.config.sliding_window);
    }

    /// Sole authority on effective concurrency: ramps linearly during
    /// `warmupPeriod`, then snaps to the steady-state `baseLimit`.
    pub fn concurrency_limit(&self) -> u32 {
        let elapsed = self.start_time.elapsed();
        if elapsed >= self.config.warmup_period {
            return self.config.base_limit;
        }
        let fraction = elapsed.as_secs_f64() / self.config.warmup_period.as_secs_f64();
        let limit = self.config.base_limit as f64 * self.config.warmup_multiplier * fraction;
        limit.round() as u32
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let idx = rank.round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResponseTimeConfig {
        ResponseTimeConfig {
            target: Duration::from_millis(100),
            sliding_window: Duration::from_secs(300),
            min_samples: 5,
            slow_pct_threshold: 0.25,
            consecutive_slow_threshold: 3,
            warmup_period: Duration::from_secs(10),
            warmup_multiplier: 0.5,
            base_limit: 100,
        }
    }

    #[test]
    fn below_min_samples_never_throttles() {
        let controller = ResponseTimeController::new(config());
        controller.record(Duration::from_millis(500));
        assert!(!controller.should_throttle());
    }

    #[test]
    fn high_slow_pct_triggers_throttle() {
        let controller = ResponseTimeController::new(config());
        for _ in 0..6 {
            controller.record(Duration::from_millis(200));
        }
        for _ in 0..2 {
            controller.record(Duration::from_millis(10));
        }
        assert!(controller.should_throttle());
    }

    #[test]
    fn throttle_decision_is_idempotent_without_new_samples() {
        let controller = ResponseTimeController::new(config());
        for _ in 0..10 {
            controller.record(Duration::from_millis(500));
        }
        assert_eq!(controller.should_throttle(), controller.should_throttle());
    }
}
