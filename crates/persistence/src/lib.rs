#![deny(warnings)]

//! On-disk calibration artifacts.
//!
//! Each fitted model is one file, `{type}-{version}.{json|bin}`, under a
//! store directory. Saves write a sibling temp file and rename it over the
//! target, so readers never observe a partial artifact.

use calibration::{
    newest, validate_version, CalibrationModel, CalibrationStore, Observation, StoreError,
};
use race_core::ProbabilityType;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Encoding of stored artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArtifactFormat {
    #[default]
    Json,
    Bincode,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Bincode => "bin",
        }
    }

    fn encode(self, model: &CalibrationModel) -> Result<Vec<u8>, StoreError> {
        match self {
            ArtifactFormat::Json => serde_json::to_vec_pretty(model)
                .map_err(|e| StoreError::Serialize(e.to_string())),
            ArtifactFormat::Bincode => {
                bincode::serialize(model).map_err(|e| StoreError::Serialize(e.to_string()))
            }
        }
    }

    fn decode(self, bytes: &[u8]) -> Result<CalibrationModel, StoreError> {
        match self {
            ArtifactFormat::Json => {
                serde_json::from_slice(bytes).map_err(|e| StoreError::Serialize(e.to_string()))
            }
            ArtifactFormat::Bincode => {
                bincode::deserialize(bytes).map_err(|e| StoreError::Serialize(e.to_string()))
            }
        }
    }
}

/// Directory-backed [`CalibrationStore`].
#[derive(Clone, Debug)]
pub struct FileCalibrationStore {
    root: PathBuf,
    format: ArtifactFormat,
}

impl FileCalibrationStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, format: ArtifactFormat) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, format })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> ArtifactFormat {
        self.format
    }

    pub fn artifact_path(&self, kind: ProbabilityType, version: &str) -> PathBuf {
        self.root
            .join(format!("{}-{}.{}", kind.as_str(), version, self.format.extension()))
    }

    /// Temp file a save writes before renaming; unique per format.
    fn staging_path(&self, kind: ProbabilityType, version: &str) -> PathBuf {
        self.artifact_path(kind, version)
            .with_extension(format!("{}.tmp", self.format.extension()))
    }

    /// Versions stored for `kind`, sorted.
    pub fn versions(&self, kind: ProbabilityType) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}-", kind.as_str());
        let suffix = format!(".{}", self.format.extension());
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let version = name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()));
            if let Some(v) = version {
                if validate_version(v).is_ok() {
                    out.push(v.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Decodes an artifact without checking its knots.
    fn read_model(
        &self,
        kind: ProbabilityType,
        version: &str,
    ) -> Result<Option<CalibrationModel>, StoreError> {
        validate_version(version)?;
        let path = self.artifact_path(kind, version);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "calibration artifact loaded");
        self.format.decode(&bytes).map(Some)
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn save(&self, model: &CalibrationModel) -> Result<(), StoreError> {
        model.validate()?;
        let path = self.artifact_path(model.probability_type, &model.version);
        let tmp = self.staging_path(model.probability_type, &model.version);
        fs::write(&tmp, self.format.encode(model)?)?;
        fs::rename(&tmp, &path)?;
        info!(path = %path.display(), kind = %model.probability_type, version = %model.version, "calibration artifact saved");
        Ok(())
    }

    fn load(
        &self,
        kind: ProbabilityType,
        version: &str,
    ) -> Result<Option<CalibrationModel>, StoreError> {
        let model = self.read_model(kind, version)?;
        if let Some(m) = &model {
            m.validate()?;
        }
        Ok(model)
    }

    fn latest(&self, kind: ProbabilityType) -> Result<Option<CalibrationModel>, StoreError> {
        let mut models = Vec::new();
        for version in self.versions(kind)? {
            if let Some(m) = self.read_model(kind, &version)? {
                models.push(m);
            }
        }
        Ok(newest(models))
    }
}

/// Historical observations per probability type.
///
/// JSON shape: `{"win": [{"predicted": 0.31, "observed": true}, ...], ...}`.
pub fn read_history(
    path: &Path,
) -> Result<BTreeMap<ProbabilityType, Vec<Observation>>, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialize(e.to_string()))
}
