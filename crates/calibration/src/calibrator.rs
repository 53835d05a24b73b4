//! Online application of fitted models to simulated probabilities.

use crate::store::{CalibrationStore, StoreError};
use crate::CalibrationModel;
use race_core::ProbabilityType;
use race_sim::GridForecast;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Calibrated { version: String },
    /// No model was available; values are the raw simulator output.
    Uncalibrated,
}

impl CalibrationStatus {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, CalibrationStatus::Calibrated { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratedBatch {
    pub probability_type: ProbabilityType,
    pub values: Vec<f64>,
    pub status: CalibrationStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationPolicy {
    /// Rescale calibrated win probabilities so the field sums to one.
    #[serde(default)]
    pub renormalize_win: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratedDriver {
    pub driver_id: String,
    pub win_probability: f64,
    pub podium_probability: f64,
    pub top10_probability: f64,
}

/// Grid forecast after calibration, drivers in the forecast's order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratedForecast {
    pub track_id: String,
    pub drivers: Vec<CalibratedDriver>,
    pub status: BTreeMap<ProbabilityType, CalibrationStatus>,
    pub win_renormalized: bool,
}

/// Holds at most one model per probability type.
#[derive(Clone, Debug, Default)]
pub struct Calibrator {
    models: BTreeMap<ProbabilityType, CalibrationModel>,
    policy: CalibrationPolicy,
}

impl Calibrator {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self {
            models: BTreeMap::new(),
            policy,
        }
    }

    /// Calibrator loaded with the newest stored model of each type.
    pub fn from_store(
        store: &dyn CalibrationStore,
        policy: CalibrationPolicy,
    ) -> Result<Self, StoreError> {
        let mut calibrator = Self::new(policy);
        for kind in ProbabilityType::ALL {
            if let Some(model) = store.latest(kind)? {
                debug!(kind = %kind, version = %model.version, "loaded calibration model");
                calibrator.install(model);
            }
        }
        Ok(calibrator)
    }

    /// Installs `model`, replacing any model of the same type.
    pub fn install(&mut self, model: CalibrationModel) {
        self.models.insert(model.probability_type, model);
    }

    pub fn model(&self, kind: ProbabilityType) -> Option<&CalibrationModel> {
        self.models.get(&kind)
    }

    pub fn policy(&self) -> CalibrationPolicy {
        self.policy
    }

    pub fn calibrate(&self, kind: ProbabilityType, raw: &[f64]) -> CalibratedBatch {
        match self.models.get(&kind) {
            Some(model) => CalibratedBatch {
                probability_type: kind,
                values: model.apply_all(raw),
                status: CalibrationStatus::Calibrated {
                    version: model.version.clone(),
                },
            },
            None => {
                warn!(kind = %kind, values = raw.len(), "no calibration model; passing raw probabilities through");
                CalibratedBatch {
                    probability_type: kind,
                    values: raw.to_vec(),
                    status: CalibrationStatus::Uncalibrated,
                }
            }
        }
    }

    pub fn calibrate_forecast(&self, forecast: &GridForecast) -> CalibratedForecast {
        let mut status = BTreeMap::new();
        let mut columns: BTreeMap<ProbabilityType, Vec<f64>> = BTreeMap::new();
        for kind in ProbabilityType::ALL {
            let batch = self.calibrate(kind, &forecast.probabilities(kind));
            status.insert(kind, batch.status);
            columns.insert(kind, batch.values);
        }

        let mut win_renormalized = false;
        if self.policy.renormalize_win {
            if let Some(win) = columns.get_mut(&ProbabilityType::Win) {
                let sum: f64 = win.iter().sum();
                if sum > 0.0 && sum.is_finite() {
                    win.iter_mut().for_each(|p| *p /= sum);
                    win_renormalized = true;
                }
            }
        }

        let column = |kind: ProbabilityType, i: usize| {
            columns.get(&kind).and_then(|c| c.get(i)).copied().unwrap_or(0.0)
        };
        let drivers = forecast
            .drivers
            .iter()
            .enumerate()
            .map(|(i, d)| CalibratedDriver {
                driver_id: d.driver_id.clone(),
                win_probability: column(ProbabilityType::Win, i),
                podium_probability: column(ProbabilityType::Podium, i),
                top10_probability: column(ProbabilityType::Top10, i),
            })
            .collect();

        CalibratedForecast {
            track_id: forecast.track_id.clone(),
            drivers,
            status,
            win_renormalized,
        }
    }
}
