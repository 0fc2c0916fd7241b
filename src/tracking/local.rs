//! File-backed experiment store
//!
//! Keeps every experiment, run and registered model in a single
//! `experiments.json` under the tracker directory, rewritten after each call.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tracker::{
    ExperimentTracker, ModelStage, ModelVersion, RunId, RunStatus, TrackerError, TrackerResult,
};

const STORE_FILE: &str = "experiments.json";

/// Reference to a logged artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub path: PathBuf,
}

/// A run within an experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: Vec<ArtifactRef>,
    pub status: RunStatus,
}

/// An experiment containing multiple runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub runs: Vec<Run>,
}

/// One version of a registered model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredVersion {
    pub version: u32,
    pub run_id: String,
    /// Artifact path within the run the version was registered from
    pub source: String,
    pub stage: ModelStage,
    pub created_at: DateTime<Utc>,
}

/// A model in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub versions: Vec<RegisteredVersion>,
}

impl RegisteredModel {
    /// Latest version in `stage`
    pub fn latest_in(&self, stage: ModelStage) -> Option<&RegisteredVersion> {
        self.versions.iter().rev().find(|v| v.stage == stage)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Store {
    experiments: Vec<Experiment>,
    registry: Vec<RegisteredModel>,
}

/// Tracker writing to a local directory
pub struct LocalTracker {
    base_dir: PathBuf,
    experiment_id: String,
    store: RwLock<Store>,
}

impl LocalTracker {
    /// Open the store under `base_dir`, creating the experiment if needed
    pub fn open(base_dir: impl Into<PathBuf>, experiment_name: &str) -> TrackerResult<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;

        let file_path = base_dir.join(STORE_FILE);
        let mut store: Store = if file_path.exists() {
            serde_json::from_reader(BufReader::new(fs::File::open(&file_path)?))?
        } else {
            Store::default()
        };

        let experiment_id = match store.experiments.iter().find(|e| e.name == experiment_name) {
            Some(e) => e.experiment_id.clone(),
            None => {
                let experiment = Experiment {
                    experiment_id: format!("exp_{}", Uuid::new_v4().simple()),
                    name: experiment_name.to_string(),
                    created_at: Utc::now(),
                    runs: Vec::new(),
                };
                let id = experiment.experiment_id.clone();
                store.experiments.push(experiment);
                id
            }
        };

        let tracker = Self {
            base_dir,
            experiment_id,
            store: RwLock::new(store),
        };
        tracker.save(&tracker.store.read())?;
        Ok(tracker)
    }

    /// Directory holding the store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Snapshot of the active experiment
    pub fn experiment(&self) -> Option<Experiment> {
        self.store
            .read()
            .experiments
            .iter()
            .find(|e| e.experiment_id == self.experiment_id)
            .cloned()
    }

    /// Snapshot of a registered model
    pub fn registered_model(&self, name: &str) -> Option<RegisteredModel> {
        self.store.read().registry.iter().find(|m| m.name == name).cloned()
    }

    /// Write the store beside the live file, then rename over it
    fn save(&self, store: &Store) -> TrackerResult<()> {
        let path = self.base_dir.join(STORE_FILE);
        let tmp_path = self.base_dir.join(format!(".{}.tmp", STORE_FILE));

        let written = fs::File::create(&tmp_path)
            .map_err(TrackerError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, store)?;
                writer.flush()?;
                writer.get_ref().sync_all()?;
                Ok(())
            })
            .and_then(|()| fs::rename(&tmp_path, &path).map_err(TrackerError::from));

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }

    /// Apply `update` to a copy of the store and keep it only once it is on disk
    fn commit<T, F>(&self, update: F) -> TrackerResult<T>
    where
        F: FnOnce(&mut Store) -> TrackerResult<T>,
    {
        let mut store = self.store.write();
        let mut next = store.clone();
        let value = update(&mut next)?;
        self.save(&next)?;
        *store = next;
        Ok(value)
    }

    fn with_run<F>(&self, run: &RunId, update: F) -> TrackerResult<()>
    where
        F: FnOnce(&mut Run),
    {
        let experiment_id = &self.experiment_id;
        self.commit(|store| {
            let entry = store
                .experiments
                .iter_mut()
                .find(|e| &e.experiment_id == experiment_id)
                .and_then(|e| e.runs.iter_mut().find(|r| r.run_id == run.as_str()))
                .ok_or_else(|| TrackerError::Protocol(format!("unknown run {}", run)))?;
            update(entry);
            Ok(())
        })
    }
}

impl ExperimentTracker for LocalTracker {
    fn name(&self) -> &'static str {
        "local"
    }

    fn begin_run(&self, run_name: &str) -> TrackerResult<RunId> {
        let run = Run {
            run_id: Uuid::new_v4().simple().to_string(),
            run_name: run_name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            status: RunStatus::Running,
        };
        let run_id = RunId::new(run.run_id.clone());

        self.commit(|store| {
            let experiment = store
                .experiments
                .iter_mut()
                .find(|e| e.experiment_id == self.experiment_id)
                .ok_or_else(|| TrackerError::Protocol("active experiment missing".to_string()))?;
            experiment.runs.push(run);
            Ok(())
        })?;

        Ok(run_id)
    }

    fn log(
        &self,
        run: &RunId,
        params: &BTreeMap<String, String>,
        metrics: &BTreeMap<String, f64>,
    ) -> TrackerResult<()> {
        self.with_run(run, |r| {
            r.params.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
            r.metrics
                .extend(metrics.iter().filter(|(_, v)| v.is_finite()).map(|(k, v)| (k.clone(), *v)));
        })
    }

    fn log_artifact(&self, run: &RunId, name: &str, path: &Path) -> TrackerResult<()> {
        if !path.exists() {
            return Err(TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("artifact {} not found", path.display()),
            )));
        }
        self.with_run(run, |r| {
            r.artifacts.push(ArtifactRef {
                name: name.to_string(),
                path: path.to_path_buf(),
            })
        })
    }

    fn end_run(&self, run: &RunId, status: RunStatus) -> TrackerResult<()> {
        self.with_run(run, |r| {
            r.status = status;
            r.end_time = Some(Utc::now());
        })
    }

    fn register_and_promote(
        &self,
        model_name: &str,
        run: &RunId,
        source: &str,
        stage: ModelStage,
    ) -> TrackerResult<ModelVersion> {
        let version = self.commit(|store| {
            let logged = store
                .experiments
                .iter()
                .flat_map(|e| e.runs.iter())
                .find(|r| r.run_id == run.as_str())
                .ok_or_else(|| TrackerError::Protocol(format!("unknown run {}", run)))?
                .artifacts
                .iter()
                .any(|a| a.name == source);
            if !logged {
                return Err(TrackerError::Protocol(format!(
                    "run {} has no artifact at {}",
                    run, source
                )));
            }

            let index = match store.registry.iter().position(|m| m.name == model_name) {
                Some(i) => i,
                None => {
                    store.registry.push(RegisteredModel {
                        name: model_name.to_string(),
                        versions: Vec::new(),
                    });
                    store.registry.len() - 1
                }
            };

            let model = &mut store.registry[index];
            let version = model.versions.last().map_or(1, |v| v.version + 1);
            model.versions.push(RegisteredVersion {
                version,
                run_id: run.as_str().to_string(),
                source: source.to_string(),
                stage,
                created_at: Utc::now(),
            });
            Ok(version)
        })?;

        Ok(ModelVersion {
            name: model_name.to_string(),
            version: version.to_string(),
            stage,
        })
    }
}
