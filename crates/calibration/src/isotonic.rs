//! Isotonic regression by pool-adjacent-violators.
//!
//! The fitted mapping is stored as strictly increasing `x` knots with
//! non-decreasing `y` values. Between knots it interpolates linearly, and
//! outside the trained range it clips to the nearest boundary.

use crate::{brier_score, CalibrationError, Observation};
use chrono::{DateTime, Utc};
use race_core::ProbabilityType;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Monotonic raw → calibrated mapping for one probability type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub probability_type: ProbabilityType,
    pub version: String,
    pub x_knots: Vec<f64>,
    pub y_knots: Vec<f64>,
    /// Observations the mapping was fitted on.
    pub n_samples: usize,
    /// In-sample Brier score of the raw predictions.
    pub brier_raw: f64,
    /// In-sample Brier score after calibration.
    pub brier_calibrated: f64,
    pub fitted_at: DateTime<Utc>,
}

impl CalibrationModel {
    /// Calibrated probability for one raw value.
    ///
    /// Out-of-range input clips to the trained boundary; NaN maps to the
    /// lowest calibrated value.
    pub fn apply(&self, raw: f64) -> f64 {
        let (xs, ys) = (&self.x_knots, &self.y_knots);
        let n = xs.len().min(ys.len());
        if n == 0 {
            return raw;
        }
        if raw.is_nan() {
            return unit(ys[0]);
        }
        let x = raw.max(xs[0]).min(xs[n - 1]);
        let i = xs[..n].partition_point(|k| *k <= x);
        if i == 0 {
            return unit(ys[0]);
        }
        if i >= n {
            return unit(ys[n - 1]);
        }
        let (x0, x1, y0, y1) = (xs[i - 1], xs[i], ys[i - 1], ys[i]);
        let t = (x - x0) / (x1 - x0);
        unit((y0 + t * (y1 - y0)).max(y0).min(y1))
    }

    pub fn apply_all(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|r| self.apply(*r)).collect()
    }

    /// Checks the knots describe a monotone map of [0,1] into [0,1].
    ///
    /// Models read back from storage must pass this before they are applied.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        validate_version(&self.version)?;
        let invalid = |reason: &'static str| {
            Err(CalibrationError::InvalidKnots {
                version: self.version.clone(),
                reason,
            })
        };
        if self.x_knots.is_empty() {
            return invalid("no knots");
        }
        if self.x_knots.len() != self.y_knots.len() {
            return invalid("x and y knot counts differ");
        }
        let in_unit = |v: &f64| v.is_finite() && (0.0..=1.0).contains(v);
        if !self.x_knots.iter().all(in_unit) || !self.y_knots.iter().all(in_unit) {
            return invalid("knot outside [0,1]");
        }
        if self.x_knots.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("x knots not strictly increasing");
        }
        if self.y_knots.windows(2).any(|w| w[0] > w[1]) {
            return invalid("y knots decreasing");
        }
        Ok(())
    }
}

fn unit(p: f64) -> f64 {
    p.max(0.0).min(1.0)
}

#[derive(Clone, Copy, Debug)]
struct Block {
    x_lo: f64,
    x_hi: f64,
    sum: f64,
    weight: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.weight
    }
}

/// Pool adjacent violators over `(x, y, weight)` points sorted by strictly increasing `x`.
///
/// Returns the knots of the non-decreasing least-squares fit.
pub fn pool_adjacent_violators(points: &[(f64, f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let mut stack: Vec<Block> = Vec::with_capacity(points.len());
    for &(x, y, w) in points {
        stack.push(Block {
            x_lo: x,
            x_hi: x,
            sum: y * w,
            weight: w,
        });
        while let [.., prev, last] = stack.as_mut_slice() {
            if prev.mean() <= last.mean() {
                break;
            }
            prev.x_hi = last.x_hi;
            prev.sum += last.sum;
            prev.weight += last.weight;
            stack.pop();
        }
    }

    let mut xs = Vec::with_capacity(stack.len() * 2);
    let mut ys = Vec::with_capacity(stack.len() * 2);
    for b in &stack {
        let y = b.mean();
        xs.push(b.x_lo);
        ys.push(y);
        if b.x_hi > b.x_lo {
            xs.push(b.x_hi);
            ys.push(y);
        }
    }
    (xs, ys)
}

/// Versions become file names: non-empty `[A-Za-z0-9._-]`, not starting with `.`.
pub fn validate_version(version: &str) -> Result<(), CalibrationError> {
    let ok = !version.is_empty()
        && !version.starts_with('.')
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(CalibrationError::InvalidVersion(version.to_string()))
    }
}

/// Fit an isotonic mapping from historical `(predicted, observed)` pairs.
pub fn fit(
    probability_type: ProbabilityType,
    version: &str,
    history: &[Observation],
) -> Result<CalibrationModel, CalibrationError> {
    validate_version(version)?;
    if history.is_empty() {
        return Err(CalibrationError::EmptyHistory(probability_type));
    }
    for (index, o) in history.iter().enumerate() {
        if !(0.0..=1.0).contains(&o.predicted) {
            return Err(CalibrationError::InvalidProbability {
                index,
                value: o.predicted,
            });
        }
    }

    let mut sorted: Vec<&Observation> = history.iter().collect();
    sorted.sort_by(|a, b| a.predicted.total_cmp(&b.predicted));

    // Merge ties so knots are strictly increasing.
    let mut points: Vec<(f64, f64, f64)> = Vec::new();
    for o in sorted {
        let y = if o.observed { 1.0 } else { 0.0 };
        match points.last_mut() {
            Some(last) if last.0 == o.predicted => {
                last.1 = (last.1 * last.2 + y) / (last.2 + 1.0);
                last.2 += 1.0;
            }
            _ => points.push((o.predicted, y, 1.0)),
        }
    }

    let (x_knots, y_knots) = pool_adjacent_violators(&points);
    let mut model = CalibrationModel {
        probability_type,
        version: version.to_string(),
        x_knots,
        y_knots,
        n_samples: history.len(),
        brier_raw: brier_score(history),
        brier_calibrated: 0.0,
        fitted_at: Utc::now(),
    };
    let calibrated: Vec<Observation> = history
        .iter()
        .map(|o| Observation {
            predicted: model.apply(o.predicted),
            observed: o.observed,
        })
        .collect();
    model.brier_calibrated = brier_score(&calibrated);
    info!(
        kind = %probability_type,
        version,
        samples = model.n_samples,
        knots = model.x_knots.len(),
        brier_raw = model.brier_raw,
        brier_calibrated = model.brier_calibrated,
        "isotonic calibration fitted"
    );
    Ok(model)
}
