//! Model family descriptors and hyperparameter grids

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};
use crate::training::{
    Criterion, DistanceMetric, Estimator, Gamma, GradientBoostingClassifier,
    GradientBoostingConfig, KNNClassifier, KNNConfig, KernelType, LogisticRegression,
    MaxFeatures, RandomForest, SVMClassifier, SVMConfig, Solver, WeightScheme,
};

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    /// Unset, e.g. unlimited tree depth
    None,
}

impl ParamValue {
    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
            ParamValue::None => f.write_str("None"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

/// One assignment of values to hyperparameter names
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Render an assignment as `a=1, b=x`
pub fn format_params(params: &ParamSet) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Hyperparameter grid: each name maps to its ordered candidate values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid {
    params: BTreeMap<String, Vec<ParamValue>>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter with its candidate values
    pub fn with<V: Into<ParamValue>>(mut self, name: &str, values: Vec<V>) -> Self {
        self.params
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Add a parameter with already-built values
    pub fn with_values(mut self, name: &str, values: Vec<ParamValue>) -> Self {
        self.params.insert(name.to_string(), values);
        self
    }

    /// Parameter names in enumeration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Candidate values for a parameter
    pub fn values(&self, name: &str) -> Option<&[ParamValue]> {
        self.params.get(name).map(Vec::as_slice)
    }

    /// Number of candidate assignments
    pub fn len(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.values().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate every assignment: names sorted, last name varying fastest
    pub fn candidates(&self) -> Result<Vec<ParamSet>> {
        if let Some((name, _)) = self.params.iter().find(|(_, v)| v.is_empty()) {
            return Err(TrainerError::InvalidParameter {
                name: name.clone(),
                value: "[]".to_string(),
                reason: "grid lists no candidate values".to_string(),
            });
        }

        let mut out: Vec<ParamSet> = vec![ParamSet::new()];
        for (name, values) in &self.params {
            let mut next = Vec::with_capacity(out.len() * values.len());
            for partial in &out {
                for value in values {
                    let mut assignment = partial.clone();
                    assignment.insert(name.clone(), value.clone());
                    next.push(assignment);
                }
            }
            out = next;
        }
        Ok(out)
    }
}

/// Estimator constructor a family builds its candidates with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    RandomForest,
    Svm,
    GradientBoosting,
    LogisticRegression,
    Knn,
}

impl FamilyKind {
    /// Hyperparameter names this kind understands
    pub fn accepted_params(&self) -> &'static [&'static str] {
        match self {
            FamilyKind::RandomForest => &[
                "n_estimators",
                "max_depth",
                "min_samples_split",
                "min_samples_leaf",
                "criterion",
                "max_features",
            ],
            FamilyKind::Svm => &["C", "kernel", "gamma", "max_iter"],
            FamilyKind::GradientBoosting => &["learning_rate", "n_estimators", "max_depth", "subsample"],
            FamilyKind::LogisticRegression => &["C", "solver", "max_iter"],
            FamilyKind::Knn => &["n_neighbors", "weights", "metric"],
        }
    }

    /// Build an untrained estimator for one assignment
    pub fn build(&self, params: &ParamSet, seed: u64) -> Result<Estimator> {
        let accepted = self.accepted_params();
        if let Some((name, value)) = params.iter().find(|(k, _)| !accepted.contains(&k.as_str())) {
            return Err(TrainerError::InvalidParameter {
                name: name.clone(),
                value: value.to_string(),
                reason: format!("not a parameter of {:?}", self),
            });
        }
        let p = Params(params);

        let estimator = match self {
            FamilyKind::RandomForest => {
                let mut rf = RandomForest::new(p.count("n_estimators")?.unwrap_or(100))
                    .with_max_depth(p.optional_count("max_depth")?)
                    .with_random_state(seed);
                if let Some(v) = p.count("min_samples_split")? {
                    rf.min_samples_split = v;
                }
                if let Some(v) = p.count("min_samples_leaf")? {
                    rf.min_samples_leaf = v;
                }
                if let Some(name) = p.string("criterion")? {
                    rf = rf.with_criterion(Criterion::from_name(name)?);
                }
                if let Some(max_features) = p.max_features()? {
                    rf = rf.with_max_features(max_features);
                }
                Estimator::RandomForest(rf)
            }
            FamilyKind::Svm => {
                let mut kernel = match p.string("kernel")? {
                    Some(name) => KernelType::from_name(name)?,
                    None => KernelType::default(),
                };
                if let KernelType::RBF { gamma } = &mut kernel {
                    *gamma = p.gamma()?.unwrap_or(Gamma::Scale);
                }
                let defaults = SVMConfig::default();
                Estimator::Svm(SVMClassifier::new(SVMConfig {
                    c: p.float("C")?.unwrap_or(defaults.c),
                    kernel,
                    max_iter: p.count("max_iter")?.unwrap_or(defaults.max_iter),
                    random_state: Some(seed),
                    ..defaults
                }))
            }
            FamilyKind::GradientBoosting => {
                let defaults = GradientBoostingConfig::default();
                Estimator::GradientBoosting(GradientBoostingClassifier::new(GradientBoostingConfig {
                    n_estimators: p.count("n_estimators")?.unwrap_or(defaults.n_estimators),
                    learning_rate: p.float("learning_rate")?.unwrap_or(defaults.learning_rate),
                    max_depth: p.count("max_depth")?.unwrap_or(defaults.max_depth),
                    subsample: p.float("subsample")?.unwrap_or(defaults.subsample),
                    random_state: Some(seed),
                    ..defaults
                }))
            }
            FamilyKind::LogisticRegression => {
                let mut lr = LogisticRegression::new();
                if let Some(c) = p.float("C")? {
                    lr = lr.with_c(c);
                }
                if let Some(solver) = p.string("solver")? {
                    lr = lr.with_solver(Solver::from_name(solver)?);
                }
                if let Some(max_iter) = p.count("max_iter")? {
                    lr = lr.with_max_iter(max_iter);
                }
                Estimator::LogisticRegression(lr)
            }
            FamilyKind::Knn => {
                let defaults = KNNConfig::default();
                let weights = match p.string("weights")? {
                    Some(name) => WeightScheme::from_name(name)?,
                    None => defaults.weights,
                };
                let metric = match p.string("metric")? {
                    Some("euclidean") | None => DistanceMetric::Euclidean,
                    Some("manhattan") => DistanceMetric::Manhattan,
                    Some(other) => {
                        return Err(TrainerError::InvalidParameter {
                            name: "metric".to_string(),
                            value: other.to_string(),
                            reason: "expected one of euclidean, manhattan".to_string(),
                        })
                    }
                };
                Estimator::Knn(KNNClassifier::new(KNNConfig {
                    n_neighbors: p.count("n_neighbors")?.unwrap_or(defaults.n_neighbors),
                    metric,
                    weights,
                }))
            }
        };

        Ok(estimator)
    }
}

/// Typed lookups over an assignment
struct Params<'a>(&'a ParamSet);

impl Params<'_> {
    fn invalid(name: &str, value: &ParamValue, reason: &str) -> TrainerError {
        TrainerError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn count(&self, name: &str) -> Result<Option<usize>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => match v.as_int() {
                Some(n) if n >= 1 => Ok(Some(n as usize)),
                _ => Err(Self::invalid(name, v, "expected a positive integer")),
            },
        }
    }

    fn optional_count(&self, name: &str) -> Result<Option<usize>> {
        match self.0.get(name) {
            Some(ParamValue::None) | None => Ok(None),
            Some(_) => self.count(name),
        }
    }

    fn float(&self, name: &str) -> Result<Option<f64>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => match v.as_float() {
                Some(f) if f.is_finite() => Ok(Some(f)),
                _ => Err(Self::invalid(name, v, "expected a finite number")),
            },
        }
    }

    fn string(&self, name: &str) -> Result<Option<&str>> {
        match self.0.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| Self::invalid(name, v, "expected a string")),
        }
    }

    fn max_features(&self) -> Result<Option<MaxFeatures>> {
        match self.0.get("max_features") {
            None => Ok(None),
            Some(ParamValue::None) => Ok(Some(MaxFeatures::All)),
            Some(ParamValue::Str(name)) => MaxFeatures::from_name(name).map(Some),
            Some(_) => self.count("max_features").map(|n| n.map(MaxFeatures::Fixed)),
        }
    }

    fn gamma(&self) -> Result<Option<Gamma>> {
        match self.0.get("gamma") {
            None => Ok(None),
            Some(ParamValue::Str(s)) if s == "scale" => Ok(Some(Gamma::Scale)),
            Some(v) => match v.as_float() {
                Some(g) if g > 0.0 && g.is_finite() => Ok(Some(Gamma::Value(g))),
                _ => Err(Self::invalid("gamma", v, "expected \"scale\" or a positive number")),
            },
        }
    }
}

/// A candidate model family: unique name, constructor and grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFamily {
    pub name: String,
    pub kind: FamilyKind,
    pub grid: ParamGrid,
}

impl ModelFamily {
    pub fn new(name: impl Into<String>, kind: FamilyKind, grid: ParamGrid) -> Self {
        Self {
            name: name.into(),
            kind,
            grid,
        }
    }
}

/// The five reference families, in declaration (tie-break) order
pub fn default_families() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            "Random Forest",
            FamilyKind::RandomForest,
            ParamGrid::new()
                .with("n_estimators", vec![50_i64, 100])
                .with_values(
                    "max_depth",
                    vec![ParamValue::Int(10), ParamValue::Int(20), ParamValue::None],
                ),
        ),
        ModelFamily::new(
            "SVM",
            FamilyKind::Svm,
            ParamGrid::new()
                .with("C", vec![1.0, 10.0])
                .with("kernel", vec!["linear", "rbf"]),
        ),
        ModelFamily::new(
            "Gradient Boosting",
            FamilyKind::GradientBoosting,
            ParamGrid::new()
                .with("learning_rate", vec![0.1, 0.01])
                .with("n_estimators", vec![50_i64, 100]),
        ),
        ModelFamily::new(
            "Logistic Regression",
            FamilyKind::LogisticRegression,
            ParamGrid::new()
                .with("C", vec![0.1, 1.0, 10.0])
                .with("solver", vec!["liblinear"]),
        ),
        ModelFamily::new(
            "KNN",
            FamilyKind::Knn,
            ParamGrid::new()
                .with("n_neighbors", vec![3_i64, 5])
                .with("weights", vec!["uniform", "distance"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_enumeration_order() {
        let grid = ParamGrid::new()
            .with("b", vec![1_i64, 2])
            .with("a", vec!["x", "y"]);

        let candidates = grid.candidates().unwrap();
        assert_eq!(grid.len(), 4);
        let rendered: Vec<String> = candidates.iter().map(format_params).collect();
        assert_eq!(rendered, vec!["a=x, b=1", "a=x, b=2", "a=y, b=1", "a=y, b=2"]);
    }

    #[test]
    fn test_empty_value_list_rejected() {
        let grid = ParamGrid::new().with_values("C", vec![]);
        assert!(matches!(
            grid.candidates(),
            Err(TrainerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_default_catalogue() {
        let families = default_families();
        let names: Vec<&str> = families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Random Forest", "SVM", "Gradient Boosting", "Logistic Regression", "KNN"]
        );
        assert_eq!(families[0].grid.len(), 6);
        assert_eq!(families[3].grid.len(), 3);
    }

    #[test]
    fn test_every_default_candidate_builds() {
        for family in default_families() {
            for params in family.grid.candidates().unwrap() {
                assert!(family.kind.build(&params, 42).is_ok(), "{} {:?}", family.name, params);
            }
        }
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let mut params = ParamSet::new();
        params.insert("n_trees".to_string(), ParamValue::Int(10));
        assert!(matches!(
            FamilyKind::RandomForest.build(&params, 0),
            Err(TrainerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_forest_split_options() {
        let mut params = ParamSet::new();
        params.insert("criterion".to_string(), ParamValue::from("entropy"));
        params.insert("max_features".to_string(), ParamValue::from("log2"));
        match FamilyKind::RandomForest.build(&params, 0).unwrap() {
            Estimator::RandomForest(rf) => {
                assert_eq!(rf.criterion, Criterion::Entropy);
                assert!(matches!(rf.max_features, MaxFeatures::Log2));
            }
            other => panic!("expected a forest, got {:?}", other),
        }

        params.insert("max_features".to_string(), ParamValue::Int(2));
        match FamilyKind::RandomForest.build(&params, 0).unwrap() {
            Estimator::RandomForest(rf) => assert!(matches!(rf.max_features, MaxFeatures::Fixed(2))),
            other => panic!("expected a forest, got {:?}", other),
        }

        params.insert("max_features".to_string(), ParamValue::None);
        match FamilyKind::RandomForest.build(&params, 0).unwrap() {
            Estimator::RandomForest(rf) => assert!(matches!(rf.max_features, MaxFeatures::All)),
            other => panic!("expected a forest, got {:?}", other),
        }

        params.insert("criterion".to_string(), ParamValue::from("mse"));
        assert!(FamilyKind::RandomForest.build(&params, 0).is_err());
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let mut params = ParamSet::new();
        params.insert("kernel".to_string(), ParamValue::Int(3));
        assert!(FamilyKind::Svm.build(&params, 0).is_err());

        params.clear();
        params.insert("kernel".to_string(), ParamValue::from("sigmoid"));
        assert!(FamilyKind::Svm.build(&params, 0).is_err());
    }

    #[test]
    fn test_param_value_display() {
        assert_eq!(ParamValue::Int(10).to_string(), "10");
        assert_eq!(ParamValue::Float(0.1).to_string(), "0.1");
        assert_eq!(ParamValue::None.to_string(), "None");
    }

    #[test]
    fn test_family_json_form() {
        let json = r#"{
            "name": "Random Forest",
            "kind": "random_forest",
            "grid": { "n_estimators": [50, 100], "max_depth": [10, null] }
        }"#;
        let family: ModelFamily = serde_json::from_str(json).unwrap();
        assert_eq!(family.kind, FamilyKind::RandomForest);
        assert_eq!(
            family.grid.values("max_depth").unwrap(),
            &[ParamValue::Int(10), ParamValue::None][..]
        );

        let text = serde_json::to_string(&default_families()).unwrap();
        let back: Vec<ModelFamily> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, default_families());
    }
}
