#![deny(warnings)]

//! Post-hoc calibration of simulated finishing probabilities.
//!
//! A monotonic isotonic mapping is fitted per [`ProbabilityType`] from
//! historical `(predicted, observed)` pairs. Fitted models are versioned and
//! kept in a [`CalibrationStore`]; the [`Calibrator`] applies the newest one
//! and passes raw values through, flagged, when none exists.

pub mod calibrator;
pub mod isotonic;
pub mod store;

pub use calibrator::{
    CalibratedBatch, CalibratedDriver, CalibratedForecast, CalibrationPolicy, CalibrationStatus,
    Calibrator,
};
pub use isotonic::{fit, pool_adjacent_violators, validate_version, CalibrationModel};
pub use store::{newest, CalibrationStore, InMemoryCalibrationStore, StoreError};

use race_core::ProbabilityType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One historical forecast and whether the event happened.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub predicted: f64,
    pub observed: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("no history to fit {0} calibration")]
    EmptyHistory(ProbabilityType),
    /// Raw probability outside [0,1] or NaN.
    #[error("observation {index}: predicted probability {value} outside [0,1]")]
    InvalidProbability { index: usize, value: f64 },
    /// Versions become file names, so only `[A-Za-z0-9._-]` is accepted.
    #[error("invalid calibration version {0:?}")]
    InvalidVersion(String),
    /// Stored knots do not describe a monotone map of [0,1].
    #[error("calibration model {version:?} has invalid knots: {reason}")]
    InvalidKnots { version: String, reason: &'static str },
}

/// Mean squared error between predictions and 0/1 outcomes; 0 for no data.
pub fn brier_score(history: &[Observation]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let total: f64 = history
        .iter()
        .map(|o| {
            let y = if o.observed { 1.0 } else { 0.0 };
            (o.predicted - y).powi(2)
        })
        .sum();
    total / history.len() as f64
}

/// Fit a model for every probability type present in `histories`.
pub fn fit_all<'a, I>(version: &str, histories: I) -> Result<Vec<CalibrationModel>, CalibrationError>
where
    I: IntoIterator<Item = (ProbabilityType, &'a [Observation])>,
{
    histories
        .into_iter()
        .map(|(kind, history)| fit(kind, version, history))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brier_matches_hand_computed() {
        let h = [
            Observation { predicted: 0.8, observed: true },
            Observation { predicted: 0.3, observed: false },
        ];
        assert!((brier_score(&h) - (0.04 + 0.09) / 2.0).abs() < 1e-12);
        assert_eq!(brier_score(&[]), 0.0);
    }

    #[test]
    fn fit_all_stops_on_first_error() {
        let good = [Observation { predicted: 0.5, observed: true }];
        let models = fit_all(
            "v1",
            [
                (ProbabilityType::Win, &good[..]),
                (ProbabilityType::Podium, &good[..]),
            ],
        )
        .unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].probability_type, ProbabilityType::Podium);

        let none: &[Observation] = &[];
        let err = fit_all("v1", [(ProbabilityType::Top10, none)]).unwrap_err();
        assert_eq!(err, CalibrationError::EmptyHistory(ProbabilityType::Top10));
    }
}
