//! Versioned storage for fitted calibration models.

use crate::{CalibrationError, CalibrationModel};
use parking_lot::RwLock;
use race_core::ProbabilityType;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("calibration store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration artifact encoding: {0}")]
    Serialize(String),
    /// Bad version name, or a model whose knots fail validation.
    #[error(transparent)]
    Invalid(#[from] CalibrationError),
}

/// Models keyed by `(probability type, version)`.
///
/// Saving an existing key replaces the model wholesale.
pub trait CalibrationStore: Send + Sync {
    fn save(&self, model: &CalibrationModel) -> Result<(), StoreError>;

    fn load(
        &self,
        kind: ProbabilityType,
        version: &str,
    ) -> Result<Option<CalibrationModel>, StoreError>;

    /// Most recently fitted model for `kind`; ties go to the greater version.
    fn latest(&self, kind: ProbabilityType) -> Result<Option<CalibrationModel>, StoreError>;
}

/// Picks the newest valid model by `fitted_at`, then version.
///
/// Models failing [`CalibrationModel::validate`] are skipped with a warning.
pub fn newest<I>(models: I) -> Option<CalibrationModel>
where
    I: IntoIterator<Item = CalibrationModel>,
{
    models
        .into_iter()
        .filter(|m| match m.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    kind = %m.probability_type,
                    version = %m.version,
                    error = %e,
                    "skipping invalid calibration model"
                );
                false
            }
        })
        .max_by(|a, b| {
            a.fitted_at
                .cmp(&b.fitted_at)
                .then_with(|| a.version.cmp(&b.version))
        })
}

#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    models: RwLock<BTreeMap<(ProbabilityType, String), CalibrationModel>>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn save(&self, model: &CalibrationModel) -> Result<(), StoreError> {
        model.validate()?;
        self.models.write().insert(
            (model.probability_type, model.version.clone()),
            model.clone(),
        );
        Ok(())
    }

    fn load(
        &self,
        kind: ProbabilityType,
        version: &str,
    ) -> Result<Option<CalibrationModel>, StoreError> {
        Ok(self.models.read().get(&(kind, version.to_string())).cloned())
    }

    fn latest(&self, kind: ProbabilityType) -> Result<Option<CalibrationModel>, StoreError> {
        let guard = self.models.read();
        Ok(newest(
            guard
                .iter()
                .filter(|((k, _), _)| *k == kind)
                .map(|(_, m)| m.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fit, Observation};
    use chrono::Duration;

    fn model(kind: ProbabilityType, version: &str) -> CalibrationModel {
        let h = [
            Observation { predicted: 0.1, observed: false },
            Observation { predicted: 0.9, observed: true },
        ];
        fit(kind, version, &h).unwrap()
    }

    #[test]
    fn save_load_and_replace() {
        let store = InMemoryCalibrationStore::new();
        assert!(store.is_empty());
        let mut m = model(ProbabilityType::Win, "v1");
        store.save(&m).unwrap();
        assert_eq!(store.load(ProbabilityType::Win, "v1").unwrap(), Some(m.clone()));
        assert_eq!(store.load(ProbabilityType::Podium, "v1").unwrap(), None);

        m.y_knots = vec![0.2, 0.7];
        store.save(&m).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.load(ProbabilityType::Win, "v1").unwrap().unwrap().y_knots,
            vec![0.2, 0.7]
        );
    }

    #[test]
    fn invalid_models_are_refused() {
        let store = InMemoryCalibrationStore::new();
        let mut m = model(ProbabilityType::Win, "v1");
        m.x_knots = vec![0.8, 0.2];
        assert!(matches!(
            store.save(&m),
            Err(StoreError::Invalid(CalibrationError::InvalidKnots { .. }))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn newest_skips_invalid_models() {
        let good = model(ProbabilityType::Win, "a");
        let mut bad = model(ProbabilityType::Win, "b");
        bad.fitted_at = good.fitted_at + Duration::seconds(60);
        bad.y_knots = vec![1.0, 0.0];
        assert_eq!(newest([good.clone(), bad.clone()]), Some(good));
        assert_eq!(newest([bad]), None);
    }

    #[test]
    fn latest_prefers_newest_fit() {
        let store = InMemoryCalibrationStore::new();
        let old = model(ProbabilityType::Top10, "b");
        let mut new = model(ProbabilityType::Top10, "a");
        new.fitted_at = old.fitted_at + Duration::seconds(60);
        store.save(&old).unwrap();
        store.save(&new).unwrap();
        store.save(&model(ProbabilityType::Win, "z")).unwrap();
        assert_eq!(
            store.latest(ProbabilityType::Top10).unwrap().map(|m| m.version),
            Some("a".to_string())
        );
        assert_eq!(store.latest(ProbabilityType::Podium).unwrap(), None);
    }
}
