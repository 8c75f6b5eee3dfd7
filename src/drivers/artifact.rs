use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::drivers::error::ArtifactError;
use crate::drivers::features::{FeatureVector, FEATURE_COUNT};
use crate::drivers::forest::RandomForest;
use crate::types::MentalState;

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Persisted learned model, written by the trainer and read at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub n_features: usize,
    pub sampling_rate_hz: f64,
    pub forest: RandomForest,
}

impl ModelArtifact {
    pub fn new(forest: RandomForest, sampling_rate_hz: f64) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            n_features: forest.n_features,
            sampling_rate_hz,
            forest,
        }
    }

    pub fn predict(&self, features: &FeatureVector) -> Option<MentalState> {
        self.forest
            .predict(&features.to_array())
            .and_then(MentalState::from_code)
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer(&mut writer, self).map_err(|source| ArtifactError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::Missing(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: ModelArtifact = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ArtifactError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(self.format_version));
        }
        if self.n_features != FEATURE_COUNT || self.forest.n_features != FEATURE_COUNT {
            return Err(ArtifactError::FeatureMismatch {
                expected: FEATURE_COUNT,
                actual: self.forest.n_features,
            });
        }
        if self.forest.n_classes != MentalState::ALL.len() {
            return Err(ArtifactError::Invalid(format!(
                "model has {} classes, expected {}",
                self.forest.n_classes,
                MentalState::ALL.len()
            )));
        }
        self.forest.validate().map_err(ArtifactError::Invalid)
    }
}
