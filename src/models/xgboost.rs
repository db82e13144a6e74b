//! Boosted-tree binary classifier backed by the XGBoost library.
//!
//! The booster is stepped one round at a time so that every evaluation set can
//! be scored after each round. Missing feature values (NaN) are handed to
//! XGBoost as missing entries.

use std::fmt;
use tracing::{debug, trace};
use xgboost::parameters::learning::{
    EvaluationMetric, LearningTaskParametersBuilder, Metrics, Objective,
};
use xgboost::parameters::tree::TreeBoosterParametersBuilder;
use xgboost::parameters::{BoosterParameters, BoosterParametersBuilder, BoosterType};
use xgboost::{Booster, DMatrix};

use super::traits::{Classifier, ModelFactory};
use crate::error::{PipelineError, Result};
use crate::feature_engineering::FeatureMatrix;

#[derive(Debug, Clone, PartialEq)]
pub struct BoosterParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Fraction of rows sampled, without replacement, for each tree.
    pub subsample: f64,
    pub reg_lambda: f64,
    pub min_child_weight: f64,
    /// Minimum loss reduction needed to keep a split.
    pub gamma: f64,
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            subsample: 1.0,
            reg_lambda: 1.0,
            min_child_weight: 1.0,
            gamma: 0.0,
            seed: 0,
        }
    }
}

impl BoosterParams {
    fn validate(&self) -> Result<()> {
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(PipelineError::Training(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        if self.learning_rate <= 0.0 || self.reg_lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(PipelineError::Training(format!(
                "invalid booster parameters: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Logistic objective scored by AUC and error at the 0.5 threshold.
    fn to_booster_parameters(&self) -> Result<BoosterParameters> {
        let tree_params = TreeBoosterParametersBuilder::default()
            .eta(self.learning_rate as f32)
            .max_depth(self.max_depth as u32)
            .subsample(self.subsample as f32)
            .lambda(self.reg_lambda as f32)
            .min_child_weight(self.min_child_weight as f32)
            .gamma(self.gamma as f32)
            .build()
            .map_err(PipelineError::Training)?;
        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::BinaryLogistic)
            .eval_metrics(Metrics::Custom(vec![
                EvaluationMetric::AUC,
                EvaluationMetric::BinaryErrorRate(0.5),
            ]))
            .seed(self.seed)
            .build()
            .map_err(PipelineError::Training)?;
        BoosterParametersBuilder::default()
            .booster_type(BoosterType::Tree(tree_params))
            .learning_params(learning_params)
            .verbose(false)
            .build()
            .map_err(PipelineError::Training)
    }
}

/// A named dataset scored after every boosting round.
#[derive(Debug, Clone, Copy)]
pub struct EvalSet<'a> {
    pub name: &'a str,
    pub features: &'a FeatureMatrix,
    pub labels: &'a [u8],
}

/// Per-round AUC and classification error for one evaluation set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalCurve {
    pub name: String,
    pub auc: Vec<f64>,
    pub error: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalHistory {
    pub curves: Vec<EvalCurve>,
}

impl EvalHistory {
    pub fn curve(&self, name: &str) -> Option<&EvalCurve> {
        self.curves.iter().find(|c| c.name == name)
    }

    pub fn rounds(&self) -> usize {
        self.curves.first().map_or(0, |c| c.auc.len())
    }
}

/// Row-major `f32` copy of the features, NaN standing for missing.
fn to_dmatrix(features: &FeatureMatrix, labels: Option<&[u8]>) -> Result<DMatrix> {
    let data: Vec<f32> = features.values.iter().map(|&v| v as f32).collect();
    let mut dmatrix = DMatrix::from_dense(&data, features.n_rows())?;
    if let Some(labels) = labels {
        let labels: Vec<f32> = labels.iter().map(|&y| f32::from(y)).collect();
        dmatrix.set_labels(&labels)?;
    }
    Ok(dmatrix)
}

/// Looks up a metric from `Booster::evaluate`, whose keys may carry a suffix
/// such as `error@0.5`.
fn metric(scores: &std::collections::HashMap<String, f32>, prefix: &str) -> Result<f64> {
    scores
        .iter()
        .find(|(name, _)| name.starts_with(prefix))
        .map(|(_, &value)| f64::from(value))
        .ok_or_else(|| PipelineError::Training(format!("booster did not report '{}'", prefix)))
}

/// Number of splits on each feature in a text model dump. XGBoost names
/// unnamed features `f<index>`, so a split line reads `0:[f3<0.5] yes=1,...`.
fn count_splits(dump: &str, n_features: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_features];
    for line in dump.lines() {
        let Some(start) = line.find("[f") else {
            continue;
        };
        let rest = &line[start + 2..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if let Some(count) = rest[..end]
            .parse::<usize>()
            .ok()
            .and_then(|feature| counts.get_mut(feature))
        {
            *count += 1;
        }
    }
    counts
}

/// Boosted-tree binary classifier with logistic loss.
pub struct GradientBoostedClassifier {
    params: BoosterParams,
    booster: Option<Booster>,
    rounds: usize,
    feature_names: Vec<String>,
    history: EvalHistory,
}

impl fmt::Debug for GradientBoostedClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradientBoostedClassifier")
            .field("params", &self.params)
            .field("trained", &self.booster.is_some())
            .field("rounds", &self.rounds)
            .field("feature_names", &self.feature_names)
            .finish()
    }
}

impl GradientBoostedClassifier {
    pub fn new(params: BoosterParams) -> Self {
        Self {
            params,
            booster: None,
            rounds: 0,
            feature_names: Vec::new(),
            history: EvalHistory::default(),
        }
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.rounds
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Metrics recorded per round for the evaluation sets passed to `fit_with_eval`.
    pub fn history(&self) -> &EvalHistory {
        &self.history
    }

    /// Number of splits made on each feature across all trees, in feature order.
    pub fn feature_importance_weight(&self) -> Result<Vec<(String, usize)>> {
        let booster = self.trained()?;
        let dump = booster.dump_model(false, None)?;
        let counts = count_splits(&dump, self.feature_names.len());
        Ok(self.feature_names.iter().cloned().zip(counts).collect())
    }

    fn trained(&self) -> Result<&Booster> {
        self.booster
            .as_ref()
            .ok_or_else(|| PipelineError::Training("model not trained".to_string()))
    }

    /// Fits the ensemble and scores every evaluation set after each round.
    pub fn fit_with_eval(
        &mut self,
        features: &FeatureMatrix,
        labels: &[u8],
        eval_sets: &[EvalSet<'_>],
    ) -> Result<()> {
        self.params.validate()?;
        let n = features.n_rows();
        if n == 0 {
            return Err(PipelineError::Training("no training rows".to_string()));
        }
        if labels.len() != n {
            return Err(PipelineError::Training(format!(
                "{} feature rows but {} labels",
                n,
                labels.len()
            )));
        }
        if labels.iter().all(|&y| y == labels[0]) {
            return Err(PipelineError::Training(format!(
                "training labels hold a single class ({})",
                labels[0]
            )));
        }
        for set in eval_sets {
            if set.features.n_features() != features.n_features()
                || set.features.n_rows() != set.labels.len()
                || set.labels.is_empty()
            {
                return Err(PipelineError::Training(format!(
                    "evaluation set '{}' does not match the training data shape",
                    set.name
                )));
            }
        }

        let dtrain = to_dmatrix(features, Some(labels))?;
        let eval_matrices = eval_sets
            .iter()
            .map(|set| to_dmatrix(set.features, Some(set.labels)))
            .collect::<Result<Vec<_>>>()?;
        let cached: Vec<&DMatrix> = std::iter::once(&dtrain).chain(&eval_matrices).collect();
        let mut booster =
            Booster::new_with_cached_dmats(&self.params.to_booster_parameters()?, &cached)?;

        let mut history = EvalHistory {
            curves: eval_sets
                .iter()
                .map(|set| EvalCurve {
                    name: set.name.to_string(),
                    ..EvalCurve::default()
                })
                .collect(),
        };
        for round in 0..self.params.n_estimators {
            booster.update(&dtrain, round as i32)?;
            for (matrix, curve) in eval_matrices.iter().zip(history.curves.iter_mut()) {
                let scores = booster.evaluate(matrix)?;
                curve.auc.push(metric(&scores, "auc")?);
                curve.error.push(metric(&scores, "error")?);
            }
            trace!(round, "Boosting round finished");
        }

        self.booster = Some(booster);
        self.rounds = self.params.n_estimators;
        self.feature_names = features.names.clone();
        self.history = history;
        debug!(
            trees = self.rounds,
            features = self.feature_names.len(),
            "Booster fitted"
        );
        Ok(())
    }
}

impl Classifier for GradientBoostedClassifier {
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
        self.fit_with_eval(features, labels, &[])
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let booster = self.trained()?;
        if features.n_features() != self.feature_names.len() {
            return Err(PipelineError::Training(format!(
                "model expects {} features, got {}",
                self.feature_names.len(),
                features.n_features()
            )));
        }
        if features.n_rows() == 0 {
            return Ok(Vec::new());
        }
        let dmatrix = to_dmatrix(features, None)?;
        Ok(booster
            .predict(&dmatrix)?
            .into_iter()
            .map(f64::from)
            .collect())
    }
}

impl ModelFactory for GradientBoostedClassifier {
    type ModelType = Self;

    fn create(params: &BoosterParams) -> Result<Self::ModelType> {
        params.validate()?;
        Ok(Self::new(params.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Two informative features and one noise column; label is x0 + x1 > 1.
    fn separable(n: usize) -> (FeatureMatrix, Vec<u8>) {
        let values = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => ((i * 37) % 101) as f64 / 100.0,
            1 => ((i * 53) % 97) as f64 / 96.0,
            _ => ((i * 11) % 7) as f64,
        });
        let labels = (0..n)
            .map(|i| u8::from(values[[i, 0]] + values[[i, 1]] > 1.0))
            .collect();
        let names = vec!["x0".to_string(), "x1".to_string(), "noise".to_string()];
        (FeatureMatrix { names, values }, labels)
    }

    fn params(n_estimators: usize) -> BoosterParams {
        BoosterParams {
            n_estimators,
            max_depth: 3,
            seed: 1958,
            ..BoosterParams::default()
        }
    }

    #[test]
    fn test_learns_separable_problem() {
        let (x, y) = separable(300);
        let mut model = GradientBoostedClassifier::new(params(50));
        model.fit(&x, &y).unwrap();

        let predicted = model.predict(&x).unwrap();
        assert!(crate::metrics::accuracy(&y, &predicted) > 0.9);
        let probabilities = model.predict_proba(&x).unwrap();
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_history_has_one_entry_per_round() {
        let (x, y) = separable(200);
        let mut model = GradientBoostedClassifier::new(params(12));
        let eval = [EvalSet {
            name: "train",
            features: &x,
            labels: &y,
        }];
        model.fit_with_eval(&x, &y, &eval).unwrap();

        let curve = model.history().curve("train").unwrap();
        assert_eq!(curve.auc.len(), 12);
        assert_eq!(curve.error.len(), 12);
        assert_eq!(model.history().rounds(), 12);
        assert_eq!(model.n_trees(), 12);
        assert!(curve.error.last().unwrap() <= curve.error.first().unwrap());
        assert!(*curve.auc.last().unwrap() > 0.9);
    }

    #[test]
    fn test_importance_counts_splits_on_informative_features() {
        let (x, y) = separable(300);
        let mut model = GradientBoostedClassifier::new(params(20));
        model.fit(&x, &y).unwrap();

        let importance = model.feature_importance_weight().unwrap();
        assert_eq!(importance.len(), 3);
        let count = |name: &str| importance.iter().find(|(n, _)| n == name).unwrap().1;
        assert!(count("x0") > 0);
        assert!(count("x1") > 0);
        assert!(count("x0") + count("x1") > count("noise"));
    }

    #[test]
    fn test_count_splits_reads_text_dump() {
        let dump = "booster[0]:\n0:[f2<0.5] yes=1,no=2,missing=1\n\t1:[f0<3] yes=3,no=4,missing=4\n\t\t3:leaf=0.1\n\t\t4:leaf=-0.2\n\t2:[f2<7.5] yes=5,no=6,missing=5\n\t\t5:leaf=0.3\n\t\t6:leaf=0.4\n";
        assert_eq!(count_splits(dump, 3), vec![1, 0, 2]);
        assert_eq!(count_splits("booster[0]:\n0:leaf=0.5\n", 2), vec![0, 0]);
    }

    #[test]
    fn test_missing_values_are_routed() {
        let (mut x, y) = separable(200);
        for i in (0..200).step_by(5) {
            x.values[[i, 0]] = f64::NAN;
        }
        let mut model = GradientBoostedClassifier::new(params(20));
        model.fit(&x, &y).unwrap();
        let probabilities = model.predict_proba(&x).unwrap();
        assert!(probabilities.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_same_seed_same_model_with_subsampling() {
        let (x, y) = separable(150);
        let p = BoosterParams {
            subsample: 0.6,
            ..params(10)
        };
        let mut a = GradientBoostedClassifier::new(p.clone());
        let mut b = GradientBoostedClassifier::new(p);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_shape_errors_are_training_failures() {
        let (x, y) = separable(20);
        let mut model = GradientBoostedClassifier::new(params(2));
        assert!(matches!(
            model.fit(&x, &y[..10]),
            Err(PipelineError::Training(_))
        ));
        assert!(matches!(
            GradientBoostedClassifier::create(&BoosterParams {
                subsample: 0.0,
                ..params(2)
            }),
            Err(PipelineError::Training(_))
        ));
    }

    #[test]
    fn test_single_class_labels_are_a_training_failure() {
        let (x, _) = separable(20);
        let mut model = GradientBoostedClassifier::new(params(2));
        assert!(matches!(
            model.fit(&x, &[0u8; 20]),
            Err(PipelineError::Training(_))
        ));
        assert!(model.predict_proba(&x).is_err());
    }

    #[test]
    fn test_unfitted_model_refuses_to_predict() {
        let (x, _) = separable(10);
        let model = GradientBoostedClassifier::new(params(2));
        assert!(model.predict_proba(&x).is_err());
        assert!(model.feature_importance_weight().is_err());
    }
}
