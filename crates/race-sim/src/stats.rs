//! Summary statistics shared by both simulation modes.
//!
//! All helpers return 0.0 on empty input rather than NaN so that degenerate
//! runs never poison downstream aggregation.

use serde::{Deserialize, Serialize};

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation.
pub fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 || xs.iter().all(|x| *x == xs[0]) {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Linear-interpolated percentile of an ascending slice, `p` in [0,100].
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Coefficient of variation of a race-time distribution.
///
/// Lower is steadier. Empty, constant or non-positive-mean input yields 0.0.
pub fn robustness(race_times: &[f64]) -> f64 {
    let m = mean(race_times);
    if !(m > 0.0 && m.is_finite()) {
        return 0.0;
    }
    let sd = std_dev(race_times);
    if sd == 0.0 || !sd.is_finite() {
        return 0.0;
    }
    sd / m
}

/// Ascending copy; NaN would sort last but simulators never produce it.
pub fn sorted(xs: &[f64]) -> Vec<f64> {
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Distribution summary for one strategy, in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceTimeSummary {
    pub trials: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub robustness: f64,
    pub min: f64,
    pub p05: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

impl RaceTimeSummary {
    pub fn from_samples(race_times: &[f64]) -> Self {
        let s = sorted(race_times);
        Self {
            trials: s.len(),
            mean: mean(&s),
            std_dev: std_dev(&s),
            robustness: robustness(&s),
            min: s.first().copied().unwrap_or(0.0),
            p05: percentile(&s, 5.0),
            p50: percentile(&s, 50.0),
            p95: percentile(&s, 95.0),
            max: s.last().copied().unwrap_or(0.0),
        }
    }
}
