//! Maintenance trainer CLI
//!
//! Command-line interface for model selection, prediction and artifact status.

use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifact::load_artifact;
use crate::config::{TrackerBackend, TrainerConfig};
use crate::data::{load_csv_matrix, split_features_label};
use crate::error::TrainerError;
use crate::pipeline::{ModelTrainer, TrainingOutcome};
use crate::selection::EvaluationReport;
use crate::training::accuracy;

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn warn(s: &str) -> ColoredString   { s.truecolor(230, 180, 80) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = if visible_len < W { W - visible_len } else { 0 };
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(&format!("{:<16}", key)), val.white())
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn step_fail(detail: &str) {
    println!("{} {}", "failed".red(), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "maintenance-trainer")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Select, train and persist a machine failure classifier")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search every model family and persist the winner
    Train {
        /// Training matrix (CSV, features then label)
        #[arg(long)]
        train: PathBuf,

        /// Test matrix (CSV, same columns as the training matrix)
        #[arg(long)]
        test: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Artifact output path
        #[arg(short, long)]
        artifact: Option<PathBuf>,

        /// Minimum acceptable winning score
        #[arg(long)]
        min_score: Option<f64>,

        /// Search families in parallel
        #[arg(long)]
        parallel: bool,

        /// MLflow tracking server URI
        #[arg(long, conflicts_with_all = ["tracking_dir", "no_tracking"])]
        tracking_uri: Option<String>,

        /// Record runs in a local directory
        #[arg(long, conflicts_with = "no_tracking")]
        tracking_dir: Option<PathBuf>,

        /// Disable experiment tracking
        #[arg(long)]
        no_tracking: bool,
    },

    /// Make predictions using a persisted model
    Predict {
        /// Model artifact
        #[arg(short, long, default_value = "artifacts/model.pkl")]
        model: PathBuf,

        /// Input matrix (CSV); a trailing label column is scored
        #[arg(short, long)]
        data: PathBuf,

        /// Output predictions file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the configured model families and their grids
    Families {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the persisted artifact
    Status {
        /// Model artifact
        #[arg(short, long, default_value = "artifacts/model.pkl")]
        artifact: PathBuf,
    },
}

/// Options of the `train` command
pub struct TrainArgs {
    pub train: PathBuf,
    pub test: PathBuf,
    pub config: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
    pub min_score: Option<f64>,
    pub parallel: bool,
    pub tracking_uri: Option<String>,
    pub tracking_dir: Option<PathBuf>,
    pub no_tracking: bool,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TrainerConfig> {
    Ok(match path {
        Some(path) => TrainerConfig::from_file(path)?,
        None => TrainerConfig::default(),
    })
}

/// Overlay command-line flags on the loaded configuration
pub fn resolve_config(args: &TrainArgs) -> anyhow::Result<TrainerConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(path) = &args.artifact {
        config.artifact_path = path.clone();
    }
    if let Some(min_score) = args.min_score {
        config.min_score = min_score;
    }
    if args.parallel {
        config.parallel_families = true;
    }

    config.tracking = if args.no_tracking {
        config.tracking.with_backend(TrackerBackend::Disabled)
    } else if let Some(uri) = &args.tracking_uri {
        config.tracking.with_backend(TrackerBackend::Mlflow { uri: uri.clone() })
    } else if let Some(dir) = &args.tracking_dir {
        config.tracking.with_backend(TrackerBackend::Local { dir: dir.clone() })
    } else {
        config.tracking.with_env_overrides()
    };

    config.validate()?;
    Ok(config)
}

fn print_scores(report: &EvaluationReport, winner: Option<&str>) {
    println!();
    println!("  {:<24} {:>10} {:>10}", muted("Family"), muted("CV score"), muted("Time"));
    println!("  {}", dim(&"─".repeat(46)));
    for entry in report.iter() {
        let time = format!("{:.2}s", entry.elapsed_secs);
        match entry.failure() {
            Some(reason) => {
                println!("  {:<24} {:>10} {:>10}", entry.family, "failed".red(), time);
                println!("    {}", dim(reason));
            }
            None => {
                let marker = if Some(entry.family.as_str()) == winner { ok(" ◆") } else { "".normal() };
                println!("  {:<24} {:>10.4} {:>10}{}", entry.family, entry.score(), time, marker);
            }
        }
    }
    println!("  {}", dim(&"─".repeat(46)));
}

fn print_outcome(outcome: &TrainingOutcome) {
    print_scores(&outcome.evaluation, Some(&outcome.winner.family));

    let m = &outcome.metrics;
    println!();
    line_box_top();
    line_box(&format!("{} {}", ok("winner"), outcome.winner.family.white().bold()));
    line_box_sep();
    line_box(&kv("CV score", &format!("{:.4}", outcome.winner.score)));
    line_box(&kv("Train accuracy", &format!("{:.4}", m.train_accuracy)));
    line_box(&kv("Test accuracy", &format!("{:.4}", m.test_accuracy)));
    line_box(&kv("Precision", &format!("{:.4}", m.precision)));
    line_box(&kv("Recall", &format!("{:.4}", m.recall)));
    line_box(&kv("F1", &format!("{:.4}", m.f1_score)));
    line_box_sep();
    for (name, value) in &outcome.best_params {
        line_box(&kv(name, &value.to_string()));
    }
    line_box_bottom();

    println!();
    println!("  {:<16} {}", muted("Artifact"), outcome.artifact.path.display());
    println!("  {:<16} {} bytes", muted("Size"), outcome.artifact.size_bytes);
    println!("  {:<16} {}", muted("SHA-256"), dim(&outcome.artifact.sha256));

    let t = &outcome.tracking;
    let tracking = match &t.promoted {
        Some(v) => format!("{} runs via {}, {} v{} → {}", t.runs_logged, t.tracker, v.name, v.version, v.stage),
        None => format!("{} runs via {}", t.runs_logged, t.tracker),
    };
    println!("  {:<16} {}", muted("Tracking"), tracking);
    if t.failures > 0 {
        println!("  {:<16} {}", muted(""), warn(&format!("{} tracker calls failed", t.failures)));
    }
    println!("  {:<16} {:.2}s", muted("Time"), outcome.elapsed_secs);
    println!();
}

pub fn cmd_train(args: TrainArgs) -> anyhow::Result<f64> {
    section("Train");

    let config = resolve_config(&args)?;

    step_run("Loading data");
    let start = Instant::now();
    let train = load_csv_matrix(&args.train)?;
    let test = load_csv_matrix(&args.test)?;
    step_done(&format!(
        "{} train / {} test rows × {} cols in {:?}",
        train.nrows(),
        test.nrows(),
        train.ncols(),
        start.elapsed()
    ));

    let trainer = ModelTrainer::new(config)?;

    step_run(&format!("Searching {} families", trainer.config().families.len()));
    match trainer.initiate_model_training(&train, &test) {
        Ok(outcome) => {
            step_done(&format!("{:.2}s", outcome.elapsed_secs));
            print_outcome(&outcome);
            Ok(outcome.test_accuracy)
        }
        Err(err) => {
            step_fail(&err.to_string());
            if let TrainerError::NoViableModel { report, .. } = err.root() {
                print_scores(report, None);
            }
            println!();
            Err(err.into())
        }
    }
}

pub fn cmd_predict(
    model_path: &Path,
    data_path: &Path,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading model");
    let artifact = load_artifact(model_path)?;
    step_done(&format!("{} ({} features)", artifact.family, artifact.feature_count));

    step_run("Loading data");
    let matrix = load_csv_matrix(data_path)?;
    step_done(&format!("{} rows × {} cols", matrix.nrows(), matrix.ncols()));

    // One column beyond the features is the label
    let (features, labels) = if matrix.ncols() == artifact.feature_count + 1 {
        let (x, y) = split_features_label(&matrix)?;
        (x, Some(y))
    } else {
        (matrix, None)
    };

    step_run("Predicting");
    let start = Instant::now();
    let predictions = artifact.predict(&features)?;
    step_done(&format!("{} rows in {:?}", predictions.len(), start.elapsed()));

    let positives = predictions.iter().filter(|&&p| p != 0.0).count();
    println!();
    println!("  {:<16} {}", muted("Predicted 1"), positives);
    println!("  {:<16} {}", muted("Predicted 0"), predictions.len() - positives);
    if let Some(labels) = &labels {
        println!(
            "  {:<16} {}",
            muted("Accuracy"),
            format!("{:.4}", accuracy(labels, &predictions)).white().bold()
        );
    }

    if let Some(output) = output {
        step_run(&format!("Saving → {}", output.display()));
        let mut df = DataFrame::new(vec![Column::new("prediction".into(), predictions.to_vec())])?;
        let mut file = std::fs::File::create(output)?;
        CsvWriter::new(&mut file).finish(&mut df)?;
        step_done(&format!("{} rows", df.height()));
    }

    println!();
    Ok(())
}

pub fn cmd_families(config_path: Option<&Path>) -> anyhow::Result<()> {
    section("Model Families");

    let config = load_config(config_path)?;
    for (i, family) in config.families.iter().enumerate() {
        println!(
            "  {} {}  {}",
            accent(&format!("{}.", i + 1)),
            family.name.white().bold(),
            dim(&format!("{} candidates", family.grid.len()))
        );
        for name in family.grid.names() {
            let values: Vec<String> = family
                .grid
                .values(name)
                .unwrap_or_default()
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("     {:<18} [{}]", muted(name), values.join(", "));
        }
    }

    println!();
    println!("  {:<16} {}", muted("CV folds"), config.cv_folds);
    println!("  {:<16} {}", muted("Minimum score"), config.min_score);
    println!();
    Ok(())
}

pub fn cmd_status(artifact_path: &Path) -> anyhow::Result<()> {
    section("Artifact Status");

    if !artifact_path.exists() {
        println!("  {:<16} {}", muted("Artifact"), artifact_path.display());
        println!("  {:<16} {}", muted("Status"), warn("missing"));
        println!();
        return Ok(());
    }

    let size = std::fs::metadata(artifact_path)?.len();
    let artifact = load_artifact(artifact_path)?;

    println!("  {:<16} {}", muted("Artifact"), artifact_path.display());
    println!("  {:<16} {}", muted("Status"), ok("ready"));
    println!("  {:<16} {} bytes", muted("Size"), size);
    println!("  {:<16} {}", muted("Family"), artifact.family.white().bold());
    println!("  {:<16} {}", muted("Features"), artifact.feature_count);
    println!("  {:<16} {}", muted("Created"), artifact.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    for (name, value) in &artifact.params {
        println!("  {:<16} {}", muted(name), value);
    }
    for (name, value) in &artifact.metrics {
        println!("  {:<16} {:.4}", muted(name), value);
    }
    println!();
    Ok(())
}
