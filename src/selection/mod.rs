//! Model selection
//!
//! Candidate search over the configured families, winner selection with a
//! quality floor, and the refit of the winning family.

pub mod family;
pub mod grid_search;
pub mod refit;
pub mod search;
pub mod selector;

pub use family::{default_families, format_params, FamilyKind, ModelFamily, ParamGrid, ParamSet, ParamValue};
pub use grid_search::{CandidateScore, GridSearch, GridSearchResult};
pub use refit::{RefitResult, WinnerRefitter};
pub use search::{CandidateSearch, EvaluationReport, FamilyEvaluation, FamilyOutcome};
pub use selector::{ModelSelector, Selection, DEFAULT_MIN_SCORE};
