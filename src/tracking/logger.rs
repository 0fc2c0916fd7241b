//! Experiment logging for a completed selection
//!
//! One run is recorded per family, in declaration order. The winner's run also
//! carries the persisted model under `model/`, and that upload is what gets
//! registered and promoted. Every tracker failure is reported as a warning and
//! counted; none of them reach the caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::tracker::{
    ExperimentTracker, ModelVersion, RunId, RunStatus, TrackerResult, MODEL_ARTIFACT_PATH,
};
use crate::artifact::ArtifactInfo;
use crate::config::TrackingConfig;
use crate::evaluation::MetricReport;
use crate::selection::{EvaluationReport, FamilyEvaluation, ParamSet, Selection};

/// Everything the logger records, borrowed from the finished pipeline
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub report: &'a EvaluationReport,
    pub selection: &'a Selection,
    /// Assignment chosen by the winner's refit
    pub winner_params: &'a ParamSet,
    pub metrics: &'a MetricReport,
    pub artifact: &'a ArtifactInfo,
    pub train_size: usize,
    pub test_size: usize,
    pub features_count: usize,
    pub random_state: u64,
}

/// What reached the tracker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSummary {
    pub tracker: String,
    /// Runs whose params and metrics were accepted
    pub runs_logged: usize,
    /// Tracker calls that failed
    pub failures: usize,
    pub winner_run: Option<RunId>,
    pub promoted: Option<ModelVersion>,
}

/// Best-effort recorder of per-family runs
pub struct ExperimentLogger<'a> {
    tracker: &'a dyn ExperimentTracker,
    config: &'a TrackingConfig,
}

impl<'a> ExperimentLogger<'a> {
    pub fn new(tracker: &'a dyn ExperimentTracker, config: &'a TrackingConfig) -> Self {
        Self { tracker, config }
    }

    fn attempt<T>(&self, summary: &mut LoggingSummary, call: &str, family: &str, result: TrackerResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                summary.failures += 1;
                warn!(
                    tracker = self.tracker.name(),
                    family = %family,
                    call,
                    error = %err,
                    "Experiment tracking call failed"
                );
                None
            }
        }
    }

    /// Record every family and promote the winner
    pub fn log_all(&self, ctx: &RunContext<'_>) -> LoggingSummary {
        let mut summary = LoggingSummary {
            tracker: self.tracker.name().to_string(),
            ..Default::default()
        };

        let mut template = ctx.metrics.as_map();
        template.insert("model_score".to_string(), ctx.selection.score);

        for entry in ctx.report.iter() {
            let is_winner = entry.family == ctx.selection.family;
            let params = self.run_params(ctx, entry, is_winner);
            let metrics = run_metrics(&template, entry, is_winner);

            let Some(run) =
                self.attempt(&mut summary, "begin_run", &entry.family, self.tracker.begin_run(&entry.family))
            else {
                continue;
            };
            debug!(family = %entry.family, run_id = %run, "Run started");

            if self
                .attempt(&mut summary, "log", &entry.family, self.tracker.log(&run, &params, &metrics))
                .is_some()
            {
                summary.runs_logged += 1;
            }

            for artifact in &self.config.run_artifacts {
                let result = self.tracker.log_artifact(&run, &artifact.name, &artifact.path);
                self.attempt(&mut summary, "log_artifact", &entry.family, result);
            }

            // The registry version points at this upload
            let model_logged = if is_winner {
                let result = self.tracker.log_artifact(&run, MODEL_ARTIFACT_PATH, &ctx.artifact.path);
                self.attempt(&mut summary, "log_model", &entry.family, result).is_some()
            } else {
                false
            };

            let result = self.tracker.end_run(&run, RunStatus::Finished);
            self.attempt(&mut summary, "end_run", &entry.family, result);

            if model_logged {
                let result = self.tracker.register_and_promote(
                    &self.config.registry_name,
                    &run,
                    MODEL_ARTIFACT_PATH,
                    self.config.promotion_stage,
                );
                if let Some(version) =
                    self.attempt(&mut summary, "register_and_promote", &entry.family, result)
                {
                    info!(
                        model = %version.name,
                        version = %version.version,
                        stage = %version.stage,
                        run_id = %run,
                        "Winner promoted"
                    );
                    summary.promoted = Some(version);
                }
            } else if is_winner {
                warn!(family = %entry.family, "Model upload failed, winner not registered");
            }
            if is_winner {
                summary.winner_run = Some(run);
            }
        }

        info!(
            tracker = %summary.tracker,
            runs = summary.runs_logged,
            failures = summary.failures,
            "Experiment logging finished"
        );
        summary
    }

    fn run_params(
        &self,
        ctx: &RunContext<'_>,
        entry: &FamilyEvaluation,
        is_winner: bool,
    ) -> BTreeMap<String, String> {
        let mut params = BTreeMap::from([
            ("model_type".to_string(), entry.family.clone()),
            ("train_size".to_string(), ctx.train_size.to_string()),
            ("test_size".to_string(), ctx.test_size.to_string()),
            ("features_count".to_string(), ctx.features_count.to_string()),
            ("random_state".to_string(), ctx.random_state.to_string()),
            ("is_winner".to_string(), is_winner.to_string()),
        ]);

        let best = if is_winner { Some(ctx.winner_params) } else { entry.best_params() };
        for (name, value) in best.into_iter().flatten() {
            params.insert(format!("best_{}", name), value.to_string());
        }

        if let Some(reason) = entry.failure() {
            params.insert("search_error".to_string(), reason.to_string());
        }

        if is_winner {
            params.insert(
                "artifact_path".to_string(),
                ctx.artifact.path.display().to_string(),
            );
            params.insert("artifact_sha256".to_string(), ctx.artifact.sha256.clone());
        }
        params
    }
}

/// Winner's metrics as the template; other families carry their own score
fn run_metrics(
    template: &BTreeMap<String, f64>,
    entry: &FamilyEvaluation,
    is_winner: bool,
) -> BTreeMap<String, f64> {
    let mut metrics = template.clone();
    if !is_winner {
        metrics.insert("test_accuracy".to_string(), entry.score());
        metrics.insert("model_score".to_string(), entry.score());
    }
    metrics.insert("search_seconds".to_string(), entry.elapsed_secs);
    metrics.retain(|_, v| v.is_finite());
    metrics
}
