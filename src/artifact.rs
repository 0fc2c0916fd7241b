//! Persisted model artifact
//!
//! The winning estimator is written with bincode next to its metric report.
//! Writes go to a temporary sibling that is renamed over the target, so a
//! reader only ever sees the previous artifact or the complete new one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Result, TrainerError};
use crate::training::{Classifier, Estimator};

/// Bumped whenever the encoded layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Everything needed to serve the winning model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub family: String,
    /// Chosen hyperparameters, rendered as strings
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub feature_count: usize,
    pub created_at: DateTime<Utc>,
    pub estimator: Estimator,
}

impl ModelArtifact {
    pub fn new(
        family: impl Into<String>,
        params: BTreeMap<String, String>,
        metrics: BTreeMap<String, f64>,
        feature_count: usize,
        estimator: Estimator,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            family: family.into(),
            params,
            metrics,
            feature_count,
            created_at: Utc::now(),
            estimator,
        }
    }

    /// Predict with the stored estimator after checking the column count
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.feature_count {
            return Err(TrainerError::ShapeError {
                expected: format!("{} features", self.feature_count),
                actual: format!("{} features", x.ncols()),
            });
        }
        self.estimator.predict(x)
    }
}

/// Location and fingerprint of a written artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the file contents
    pub sha256: String,
}

fn persistence(path: &Path, source: io::Error) -> TrainerError {
    TrainerError::Persistence {
        path: path.to_path_buf(),
        source,
    }
}

/// Encode failures are reported against the destination like any write failure
fn encoding_failure(path: &Path, err: bincode::Error) -> TrainerError {
    persistence(path, io::Error::new(io::ErrorKind::InvalidData, err))
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{:02x}", b)).collect()
}

/// Write `artifact` to `path`, replacing any earlier artifact
pub fn save_artifact(artifact: &ModelArtifact, path: &Path) -> Result<ArtifactInfo> {
    let bytes = bincode::serialize(artifact).map_err(|e| encoding_failure(path, e))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| persistence(path, e))?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| {
            persistence(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"),
            )
        })?
        .to_string_lossy();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let write_tmp = || -> io::Result<()> {
        let mut writer = BufWriter::new(fs::File::create(&tmp_path)?);
        writer.write_all(&bytes)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()
    };
    if let Err(e) = write_tmp().and_then(|_| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(persistence(path, e));
    }

    let size_bytes = fs::metadata(path).map_err(|e| persistence(path, e))?.len();
    if size_bytes == 0 {
        return Err(persistence(
            path,
            io::Error::new(io::ErrorKind::UnexpectedEof, "artifact is empty after write"),
        ));
    }

    let info = ArtifactInfo {
        path: path.to_path_buf(),
        size_bytes,
        sha256: sha256_hex(&bytes),
    };
    info!(path = %path.display(), size_bytes, family = %artifact.family, "Artifact written");
    Ok(info)
}

/// Read an artifact written by [`save_artifact`]
pub fn load_artifact(path: &Path) -> Result<ModelArtifact> {
    let metadata = fs::metadata(path).map_err(|e| persistence(path, e))?;
    if metadata.len() == 0 {
        return Err(persistence(
            path,
            io::Error::new(io::ErrorKind::UnexpectedEof, "artifact is empty"),
        ));
    }

    let bytes = fs::read(path).map_err(|e| persistence(path, e))?;
    let artifact: ModelArtifact = bincode::deserialize(&bytes)?;
    if artifact.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(TrainerError::SerializationError(format!(
            "unsupported artifact format {} (expected {})",
            artifact.format_version, ARTIFACT_FORMAT_VERSION
        )));
    }
    Ok(artifact)
}
