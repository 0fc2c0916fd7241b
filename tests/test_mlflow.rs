//! Integration test: MLflow REST client against an in-process stand-in server

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::{Json, Router};
use maintenance_trainer::config::{RunArtifact, TrackerBackend, TrackingConfig, TrainerConfig};
use maintenance_trainer::pipeline::ModelTrainer;
use maintenance_trainer::selection::{FamilyKind, ModelFamily, ParamGrid};
use maintenance_trainer::tracking::{
    ExperimentTracker, MlflowTracker, ModelStage, RunStatus, MODEL_ARTIFACT_PATH,
};
use ndarray::{array, Array2};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

const EXPERIMENT_ID: &str = "7";
const ARTIFACTS: &str = "/api/2.0/mlflow-artifacts/artifacts";

#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    body: Value,
    bytes: usize,
}

/// Records every request and answers like a tracking server with an artifact proxy
#[derive(Default)]
struct MockMlflow {
    calls: Mutex<Vec<Call>>,
    runs: Mutex<usize>,
    registered: Mutex<bool>,
    versions: Mutex<usize>,
}

impl MockMlflow {
    fn respond(&self, method: &Method, path: &str, body: &Value) -> (StatusCode, Json<Value>) {
        if path.starts_with(ARTIFACTS) && method == Method::PUT {
            return (StatusCode::OK, Json(json!({})));
        }
        let endpoint = path.strip_prefix("/api/2.0/mlflow/").unwrap_or_default();

        match endpoint {
            "experiments/get-by-name" => api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST"),
            "experiments/create" => ok(json!({ "experiment_id": EXPERIMENT_ID })),
            "runs/create" => {
                let mut runs = self.runs.lock();
                *runs += 1;
                let run_id = format!("run{}", *runs);
                ok(json!({
                    "run": { "info": {
                        "run_id": run_id,
                        "artifact_uri": format!("mlflow-artifacts:/{}/{}/artifacts", EXPERIMENT_ID, run_id),
                    }}
                }))
            }
            "runs/log-batch" | "runs/update" | "model-versions/transition-stage" => ok(json!({})),
            "registered-models/create" => {
                let mut registered = self.registered.lock();
                if *registered {
                    api_error(StatusCode::BAD_REQUEST, "RESOURCE_ALREADY_EXISTS")
                } else {
                    *registered = true;
                    ok(json!({ "registered_model": { "name": body["name"] } }))
                }
            }
            "model-versions/create" => {
                let mut versions = self.versions.lock();
                *versions += 1;
                ok(json!({ "model_version": { "version": (*versions).to_string() } }))
            }
            _ => api_error(StatusCode::NOT_FOUND, "ENDPOINT_NOT_FOUND"),
        }
    }

    fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        let path = format!("/api/2.0/mlflow/{}", endpoint);
        self.calls.lock().iter().filter(|c| c.path == path).cloned().collect()
    }

    fn uploads(&self) -> Vec<(String, usize)> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == Method::PUT)
            .map(|c| (c.path.clone(), c.bytes))
            .collect()
    }
}

fn ok(body: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(body))
}

fn api_error(status: StatusCode, code: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error_code": code, "message": code.to_lowercase() })))
}

async fn handle(
    State(mock): State<Arc<MockMlflow>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();
    let response = mock.respond(&method, &path, &parsed);
    mock.calls.lock().push(Call {
        method,
        path,
        body: parsed,
        bytes: body.len(),
    });
    response
}

/// Start the server on its own runtime thread and return its base URL
fn serve(mock: Arc<MockMlflow>) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let app = Router::new().fallback(handle).with_state(mock);
            axum::serve(listener, app).await.unwrap();
        });
    });
    url
}

#[test]
fn test_registered_version_points_at_uploaded_model() {
    let mock = Arc::new(MockMlflow::default());
    let url = serve(mock.clone());
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.pkl");
    std::fs::write(&model, b"weights").unwrap();

    let tracker = MlflowTracker::connect(&url, "predictive_maintenance", Duration::from_secs(5)).unwrap();
    assert_eq!(tracker.experiment_id(), EXPERIMENT_ID);

    let run = tracker.begin_run("KNN").unwrap();
    let params = BTreeMap::from([("model_type".to_string(), "KNN".to_string())]);
    let metrics = BTreeMap::from([
        ("test_accuracy".to_string(), 0.9),
        ("model_score".to_string(), f64::NEG_INFINITY),
    ]);
    tracker.log(&run, &params, &metrics).unwrap();
    tracker.log_artifact(&run, MODEL_ARTIFACT_PATH, &model).unwrap();
    tracker.end_run(&run, RunStatus::Finished).unwrap();
    let version = tracker
        .register_and_promote("best_maintenance_predictor", &run, MODEL_ARTIFACT_PATH, ModelStage::Production)
        .unwrap();
    assert_eq!(version.version, "1");
    assert_eq!(version.stage, ModelStage::Production);

    let created = mock.calls_to("experiments/create");
    assert_eq!(created[0].body["name"], "predictive_maintenance");

    let batch = &mock.calls_to("runs/log-batch")[0];
    assert_eq!(batch.body["run_id"], "run1");
    assert_eq!(batch.body["metrics"].as_array().unwrap().len(), 1);

    // The registry source resolves to the directory the model was uploaded into
    let registration = &mock.calls_to("model-versions/create")[0];
    assert_eq!(registration.body["source"], "runs:/run1/model");
    assert_eq!(registration.body["run_id"], "run1");
    assert_eq!(
        mock.uploads(),
        vec![(format!("{}/{}/run1/artifacts/model/model.pkl", ARTIFACTS, EXPERIMENT_ID), 7)]
    );

    let transition = &mock.calls_to("model-versions/transition-stage")[0];
    assert_eq!(transition.body["version"], "1");
    assert_eq!(transition.body["stage"], "Production");
}

fn split() -> (Array2<f64>, Array2<f64>) {
    let train = array![
        [0.0, 0.1, 0.0], [0.2, 0.0, 0.0], [0.1, 0.3, 0.0], [0.3, 0.2, 0.0],
        [0.2, 0.2, 0.0], [0.4, 0.1, 0.0], [0.1, 0.0, 0.0], [0.0, 0.4, 0.0],
        [2.0, 2.1, 1.0], [2.2, 2.0, 1.0], [2.1, 2.3, 1.0], [2.3, 2.2, 1.0],
        [2.2, 2.2, 1.0], [2.4, 2.1, 1.0], [2.1, 2.0, 1.0], [2.0, 2.4, 1.0],
    ];
    let test = array![[0.1, 0.1, 0.0], [2.1, 2.1, 1.0], [0.3, 0.0, 0.0], [2.0, 2.4, 1.0]];
    (train, test)
}

#[test]
fn test_pipeline_promotes_the_persisted_model() {
    let mock = Arc::new(MockMlflow::default());
    let url = serve(mock.clone());
    let dir = TempDir::new().unwrap();
    let artifacts = dir.path().join("artifacts");

    let config = TrainerConfig::default()
        .with_artifact_path(artifacts.join("model.pkl"))
        .with_families(vec![
            ModelFamily::new(
                "Logistic Regression",
                FamilyKind::LogisticRegression,
                ParamGrid::new().with("C", vec![0.1, 1.0]),
            ),
            ModelFamily::new("KNN", FamilyKind::Knn, ParamGrid::new().with("n_neighbors", vec![3_i64])),
        ])
        .with_tracking(
            TrackingConfig::default()
                .with_backend(TrackerBackend::Mlflow { uri: url })
                .with_run_artifacts(vec![RunArtifact {
                    name: "model_artifacts".to_string(),
                    path: artifacts.clone(),
                }]),
        );
    let trainer = ModelTrainer::new(config).unwrap();
    let (train, test) = split();

    let outcome = trainer.initiate_model_training(&train, &test).unwrap();
    assert_eq!(outcome.tracking.tracker, "mlflow");
    assert_eq!(outcome.tracking.failures, 0);
    assert_eq!(outcome.tracking.runs_logged, 2);

    let run_names: Vec<Value> = mock
        .calls_to("runs/create")
        .iter()
        .map(|c| c.body["run_name"].clone())
        .collect();
    assert_eq!(run_names, vec![json!("Logistic Regression"), json!("KNN")]);

    let winner_run = outcome.tracking.winner_run.clone().unwrap();
    let registration = &mock.calls_to("model-versions/create")[0];
    assert_eq!(registration.body["source"], format!("runs:/{}/{}", winner_run, MODEL_ARTIFACT_PATH));

    let model_upload = format!(
        "{}/{}/{}/artifacts/model/model.pkl",
        ARTIFACTS, EXPERIMENT_ID, winner_run
    );
    let uploads = mock.uploads();
    assert!(uploads.contains(&(model_upload, outcome.artifact.size_bytes as usize)));
    for run in ["run1", "run2"] {
        let dir_upload = format!("{}/{}/{}/artifacts/model_artifacts/model.pkl", ARTIFACTS, EXPERIMENT_ID, run);
        assert!(uploads.iter().any(|(path, _)| *path == dir_upload), "missing {}", dir_upload);
    }
    assert_eq!(uploads.len(), 3);
    assert_eq!(outcome.tracking.promoted.as_ref().unwrap().version, "1");

    // The registered model already exists on the second run
    let second = trainer.initiate_model_training(&train, &test).unwrap();
    assert_eq!(second.tracking.failures, 0);
    assert_eq!(second.tracking.promoted.unwrap().version, "2");
    assert_eq!(mock.calls_to("registered-models/create").len(), 2);
}
