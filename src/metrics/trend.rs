//! C2: TrendAnalyzer — least-squares regression, leak detection, and
//! threshold projection over a scalar time series.

use std::time::Instant;

/// Minimum points required before a trend is considered meaningful.
pub const MIN_DATA_POINTS_FOR_ANALYSIS: usize = 10;

const SLOPE_EPSILON: f64 = 1e-4;
const STEADY_LEAK_RMSE_THRESHOLD: f64 = 0.1;
const SAWTOOTH_MIN_PEAKS: usize = 3;
const SAWTOOTH_CV_THRESHOLD: f64 = 0.3;

/// Leak classification surfaced alongside a trend. Never acted on
/// automatically — these become `Signal`s consumed by the alerting policy
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LeakSignal {
    None,
    SteadyLeak { rmse: f64 },
    SawtoothLeak { peaks: usize, interval_cv: f64 },
}

/// Result of a linear regression over a windowed series, plus the derived
/// projections spec.md §4.2 requires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub slope: f64,
    pub intercept: f64,
    pub is_increasing: bool,
    /// Seconds until the value reaches 1.5x its current value, or `None`
    /// ("never") when the slope is too flat to project meaningfully.
    pub projected_time_to_threshold: Option<f64>,
    pub projected_peak: f64,
    pub leak: LeakSignal,
}

impl Trend {
    fn neutral(observed_max: f64) -> Self {
        Self {
            slope: 0.0,
            intercept: 0.0,
            is_increasing: false,
            projected_time_to_threshold: None,
            projected_peak: observed_max,
            leak: LeakSignal::None,
        }
    }
}

/// Runs the regression and leak checks. Fewer than
/// `MIN_DATA_POINTS_FOR_ANALYSIS` points in `series` never fails — it
/// yields a neutral trend.
pub fn analyze(series: &[(Instant, f64)]) -> Trend {
    if series.len() < MIN_DATA_POINTS_FOR_ANALYSIS {
        let observed_max = series.iter().map(|(_, v)| *v).fold(0.0, f64::max);
        return Trend::neutral(observed_max);
    }

    let t0 = series[0].0;
    let xs: Vec<f64> = series
        .iter()
        .map(|(t, _)| t.saturating_duration_since(t0).as_secs_f64())
        .collect();
    let ys: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let n = xs.len() as f64;

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    let (slope, intercept) = if denom.abs() < f64::EPSILON {
        (0.0, sum_y / n)
    } else {
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;
        (slope, intercept)
    };

    let current_value = *ys.last().unwrap_or(&0.0);
    let observed_max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let window_seconds = xs.last().copied().unwrap_or(0.0);

    let projected_time_to_threshold = if slope.abs() >= SLOPE_EPSILON {
        Some((1.5 * current_value - intercept) / slope)
    } else {
        None
    };

    let projected_peak = if slope > 0.0 {
        observed_max.max(slope * window_seconds + intercept)
    } else {
        observed_max
    };

    let mean_y = sum_y / n;
    let rmse = {
        let sq_err: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| {
                let predicted = slope * x + intercept;
                (y - predicted).powi(2)
            })
            .sum();
        (sq_err / n).sqrt()
    };
    let normalized_rmse = if mean_y.abs() > f64::EPSILON {
        rmse / mean_y.abs()
    } else {
        rmse
    };

    let leak = if slope > 0.0 && normalized_rmse < STEADY_LEAK_RMSE_THRESHOLD {
        LeakSignal::SteadyLeak { rmse: normalized_rmse }
    } else {
        sawtooth_signal(&xs, &ys)
    };

    Trend {
        slope,
        intercept,
        is_increasing: slope > 0.0,
        projected_time_to_threshold,
        projected_peak,
        leak,
    }
}

fn sawtooth_signal(xs: &[f64], ys: &[f64]) -> LeakSignal {
    let mut peak_times = Vec::new();
    for i in 1..ys.len().saturating_sub(1) {
        if ys[i] > ys[i - 1] && ys[i] > ys[i + 1] {
            peak_times.push(xs[i]);
        }
    }
    if peak_times.len() < SAWTOOTH_MIN_PEAKS {
        return LeakSignal::None;
    }
    let intervals: Vec<f64> = peak_times.windows(2).map(|w| w[1] - w[0]).collect();
    if intervals.is_empty() {
        return LeakSignal::None;
    }
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean.abs() < f64::EPSILON {
        return LeakSignal::None;
    }
    let variance =
        intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    let cv = variance.sqrt() / mean.abs();
    if cv < SAWTOOTH_CV_THRESHOLD {
        LeakSignal::SawtoothLeak {
            peaks: peak_times.len(),
            interval_cv: cv,
        }
    } else {
        LeakSignal::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn series_from(values: &[f64], step: Duration) -> Vec<(Instant, f64)> {
        let t0 = Instant::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + step * i as u32, *v))
            .collect()
    }

    #[test]
    fn fewer_than_floor_points_is_neutral() {
        let series = series_from(&[1.0, 2.0, 3.0], Duration::from_secs(1));
        let trend = analyze(&series);
        assert_eq!(trend.slope, 0.0);
        assert!(!trend.is_increasing);
    }

    #[test]
    fn pure_linear_growth_is_a_steady_leak() {
        let values: Vec<f64> = (0..21).map(|i| 100.0 + 10.0 * i as f64).collect();
        let series = series_from(&values, Duration::from_secs(10));
        let trend = analyze(&series);
        assert!(trend.slope > 0.0);
        assert!(trend.is_increasing);
        assert!(matches!(trend.leak, LeakSignal::SteadyLeak { rmse } if rmse < 0.1));
    }

    #[test]
    fn sawtooth_pattern_is_detected() {
        let mut values = Vec::new();
        for _ in 0..5 {
            values.extend_from_slice(&[10.0, 20.0, 30.0, 15.0]);
        }
        let series = series_from(&values, Duration::from_secs(5));
        let trend = analyze(&series);
        assert!(matches!(trend.leak, LeakSignal::SawtoothLeak { peaks, .. } if peaks >= 3));
    }

    #[test]
    fn flat_series_has_no_projection() {
        let values = vec![50.0; 15];
        let series = series_from(&values, Duration::from_secs(1));
        let trend = analyze(&series);
        assert!(trend.projected_time_to_threshold.is_none());
    }
}
