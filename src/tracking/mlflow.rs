//! MLflow tracking server client (REST API 2.0)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::tracker::{
    ExperimentTracker, ModelStage, ModelVersion, RunId, RunStatus, TrackerError, TrackerResult,
};

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:/";

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// Client for one experiment on an MLflow tracking server
pub struct MlflowTracker {
    base_url: String,
    client: Client,
    experiment_id: String,
    /// `run_id -> artifact_uri` as returned by `runs/create`
    artifact_uris: RwLock<BTreeMap<String, String>>,
}

impl MlflowTracker {
    /// Connect and resolve (or create) the experiment by name
    pub fn connect(tracking_uri: &str, experiment_name: &str, timeout: Duration) -> TrackerResult<Self> {
        let base_url = tracking_uri.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TrackerError::Unavailable(format!(
                "unsupported tracking URI {}",
                tracking_uri
            )));
        }

        let client = Client::builder().timeout(timeout).build()?;
        let mut tracker = Self {
            base_url,
            client,
            experiment_id: String::new(),
            artifact_uris: RwLock::new(BTreeMap::new()),
        };
        tracker.experiment_id = tracker.resolve_experiment(experiment_name)?;
        debug!(experiment_id = %tracker.experiment_id, "Connected to MLflow");
        Ok(tracker)
    }

    /// Experiment the runs are created in
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    fn resolve_experiment(&self, name: &str) -> TrackerResult<String> {
        let response = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", name)])
            .send()?;

        match Self::read(response) {
            Ok(body) => Self::string_at(&body, &["experiment", "experiment_id"]),
            Err(TrackerError::Api { code, .. }) if code == "RESOURCE_DOES_NOT_EXIST" => {
                let body = self.post("experiments/create", json!({ "name": name }))?;
                Self::string_at(&body, &["experiment_id"])
            }
            Err(err) => Err(err),
        }
    }

    fn post(&self, path: &str, body: Value) -> TrackerResult<Value> {
        debug!(endpoint = path, "MLflow request");
        let response = self.client.post(self.endpoint(path)).json(&body).send()?;
        Self::read(response)
    }

    fn read(response: Response) -> TrackerResult<Value> {
        let status = response.status();
        let text = response.text()?;
        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let parsed: Option<ApiError> = serde_json::from_str(&text).ok();
        Err(match parsed {
            Some(api) if !api.error_code.is_empty() => TrackerError::Api {
                code: api.error_code,
                message: api.message,
            },
            _ => TrackerError::Api {
                code: status.as_u16().to_string(),
                message: text,
            },
        })
    }

    fn string_at(body: &Value, path: &[&str]) -> TrackerResult<String> {
        let mut node = body;
        for key in path {
            node = node
                .get(*key)
                .ok_or_else(|| TrackerError::Protocol(format!("missing field {}", path.join("."))))?;
        }
        node.as_str()
            .map(str::to_string)
            .ok_or_else(|| TrackerError::Protocol(format!("field {} is not a string", path.join("."))))
    }

    fn upload_file(&self, artifact_root: &str, relative: &str, file: &Path) -> TrackerResult<()> {
        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url, artifact_root, relative
        );
        debug!(url = %url, "Uploading artifact");
        let response = self.client.put(url).body(fs::read(file)?).send()?;
        Self::read(response).map(|_| ())
    }

    /// Upload `dir`'s contents under `prefix`, recursing into subdirectories
    fn upload_tree(&self, artifact_root: &str, prefix: &str, dir: &Path) -> TrackerResult<()> {
        let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let child = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
            let path = entry.path();
            if path.is_dir() {
                self.upload_tree(artifact_root, &child, &path)?;
            } else {
                self.upload_file(artifact_root, &child, &path)?;
            }
        }
        Ok(())
    }
}

impl ExperimentTracker for MlflowTracker {
    fn name(&self) -> &'static str {
        "mlflow"
    }

    fn begin_run(&self, run_name: &str) -> TrackerResult<RunId> {
        let body = self.post(
            "runs/create",
            json!({
                "experiment_id": self.experiment_id,
                "run_name": run_name,
                "start_time": Utc::now().timestamp_millis(),
                "tags": [{ "key": "mlflow.runName", "value": run_name }],
            }),
        )?;
        let run_id = Self::string_at(&body, &["run", "info", "run_id"])?;
        if let Ok(uri) = Self::string_at(&body, &["run", "info", "artifact_uri"]) {
            self.artifact_uris.write().insert(run_id.clone(), uri);
        }
        Ok(RunId::new(run_id))
    }

    fn log(
        &self,
        run: &RunId,
        params: &BTreeMap<String, String>,
        metrics: &BTreeMap<String, f64>,
    ) -> TrackerResult<()> {
        let timestamp = Utc::now().timestamp_millis();
        let params: Vec<Value> = params
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        let metrics: Vec<Value> = metrics
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| json!({ "key": k, "value": v, "timestamp": timestamp, "step": 0 }))
            .collect();

        self.post(
            "runs/log-batch",
            json!({ "run_id": run.as_str(), "params": params, "metrics": metrics }),
        )
        .map(|_| ())
    }

    fn log_artifact(&self, run: &RunId, name: &str, path: &Path) -> TrackerResult<()> {
        let uri = self
            .artifact_uris
            .read()
            .get(run.as_str())
            .cloned()
            .ok_or_else(|| TrackerError::Protocol(format!("no artifact URI for run {}", run)))?;
        let root = uri.strip_prefix(ARTIFACT_SCHEME).ok_or_else(|| {
            TrackerError::Unavailable(format!("artifact store {} is not served by the tracking server", uri))
        })?;
        let root = root.trim_matches('/');
        let prefix = name.trim_matches('/');

        if path.is_dir() {
            return self.upload_tree(root, prefix, path);
        }
        let file_name = path.file_name().ok_or_else(|| {
            TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("artifact {} has no file name", path.display()),
            ))
        })?;
        self.upload_file(root, &format!("{}/{}", prefix, file_name.to_string_lossy()), path)
    }

    fn end_run(&self, run: &RunId, status: RunStatus) -> TrackerResult<()> {
        self.post(
            "runs/update",
            json!({
                "run_id": run.as_str(),
                "status": status.as_mlflow(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        )
        .map(|_| ())
    }

    fn register_and_promote(
        &self,
        model_name: &str,
        run: &RunId,
        source: &str,
        stage: ModelStage,
    ) -> TrackerResult<ModelVersion> {
        match self.post("registered-models/create", json!({ "name": model_name })) {
            Ok(_) => {}
            Err(TrackerError::Api { code, .. }) if code == "RESOURCE_ALREADY_EXISTS" => {}
            Err(err) => return Err(err),
        }

        let body = self.post(
            "model-versions/create",
            json!({
                "name": model_name,
                "source": format!("runs:/{}/{}", run, source.trim_matches('/')),
                "run_id": run.as_str(),
            }),
        )?;
        let version = Self::string_at(&body, &["model_version", "version"])?;

        self.post(
            "model-versions/transition-stage",
            json!({
                "name": model_name,
                "version": version,
                "stage": stage.to_string(),
                "archive_existing_versions": false,
            }),
        )?;

        Ok(ModelVersion {
            name: model_name.to_string(),
            version,
            stage,
        })
    }
}
