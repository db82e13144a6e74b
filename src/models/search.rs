use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use tracing::{debug, info};

use super::xgboost::BoosterParams;
use super::traits::{Classifier, ModelFactory};
use crate::error::{PipelineError, Result};
use crate::feature_engineering::FeatureMatrix;
use crate::metrics::{accuracy, roc_auc};
use crate::split::{SplitIndices, StratifiedKFold};

/// Discrete values to search for each tunable hyperparameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    pub learning_rate: Vec<f64>,
    pub subsample: Vec<f64>,
    pub max_depth: Vec<usize>,
    pub n_estimators: Vec<usize>,
    pub reg_lambda: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            learning_rate: vec![0.1, 0.01],
            subsample: vec![0.6, 0.8, 1.0],
            max_depth: vec![2, 3, 4],
            n_estimators: vec![100, 200, 500, 600],
            reg_lambda: vec![1.0, 1.5, 2.0],
        }
    }
}

impl ParamGrid {
    pub fn len(&self) -> usize {
        self.learning_rate.len()
            * self.subsample.len()
            * self.max_depth.len()
            * self.n_estimators.len()
            * self.reg_lambda.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes a flat grid index into parameters, last axis varying fastest.
    pub fn point(&self, mut index: usize, base: &BoosterParams) -> BoosterParams {
        let mut take = |len: usize| {
            let i = index % len;
            index /= len;
            i
        };
        let reg_lambda = self.reg_lambda[take(self.reg_lambda.len())];
        let n_estimators = self.n_estimators[take(self.n_estimators.len())];
        let max_depth = self.max_depth[take(self.max_depth.len())];
        let subsample = self.subsample[take(self.subsample.len())];
        let learning_rate = self.learning_rate[take(self.learning_rate.len())];
        BoosterParams {
            n_estimators,
            learning_rate,
            max_depth,
            subsample,
            reg_lambda,
            ..base.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub params: BoosterParams,
    pub fold_auc: Vec<f64>,
    pub mean_auc: f64,
    pub mean_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub best_params: BoosterParams,
    /// Mean cross-validated AUC of the best trial.
    pub best_score: f64,
    pub best_index: usize,
    pub trials: Vec<TrialResult>,
}

/// Randomized search over a [`ParamGrid`], scored by stratified k-fold AUC.
#[derive(Debug, Clone)]
pub struct RandomizedSearch {
    pub grid: ParamGrid,
    pub base: BoosterParams,
    pub n_iter: usize,
    pub n_folds: usize,
    pub seed: u64,
}

impl RandomizedSearch {
    pub fn new(grid: ParamGrid, n_iter: usize, n_folds: usize, seed: u64) -> Self {
        Self {
            grid,
            base: BoosterParams {
                seed,
                ..BoosterParams::default()
            },
            n_iter,
            n_folds,
            seed,
        }
    }

    /// Draws `n_iter` distinct grid points, or the whole grid if it is smaller.
    pub fn candidates(&self) -> Vec<BoosterParams> {
        let size = self.grid.len();
        let amount = self.n_iter.min(size);
        let mut rng = Pcg64Mcg::seed_from_u64(self.seed);
        rand::seq::index::sample(&mut rng, size, amount)
            .into_iter()
            .map(|index| self.grid.point(index, &self.base))
            .collect()
    }

    /// Cross-validates every candidate in parallel and picks the best mean AUC.
    /// A failing trial fails the search.
    pub fn run<F: ModelFactory>(
        &self,
        features: &FeatureMatrix,
        labels: &[u8],
    ) -> Result<SearchResult> {
        if self.grid.is_empty() || self.n_iter == 0 {
            return Err(PipelineError::Training(
                "hyperparameter search has no candidates".to_string(),
            ));
        }
        let folds = StratifiedKFold::new(self.n_folds).split(labels)?;
        let candidates = self.candidates();
        info!(
            candidates = candidates.len(),
            folds = folds.len(),
            "Starting randomized search"
        );

        let trials: Vec<TrialResult> = candidates
            .into_par_iter()
            .map(|params| cross_validate::<F>(params, features, labels, &folds))
            .collect::<Result<_>>()?;

        let (best_index, best) = trials
            .iter()
            .enumerate()
            .fold(None::<(usize, &TrialResult)>, |best, (i, trial)| match best {
                Some((_, b)) if b.mean_auc >= trial.mean_auc => best,
                _ => Some((i, trial)),
            })
            .ok_or_else(|| PipelineError::Training("no trials completed".to_string()))?;

        let best_params = best.params.clone();
        let best_score = best.mean_auc;
        info!(best_score, ?best_params, "Randomized search finished");
        Ok(SearchResult {
            best_params,
            best_score,
            best_index,
            trials,
        })
    }
}

fn cross_validate<F: ModelFactory>(
    params: BoosterParams,
    features: &FeatureMatrix,
    labels: &[u8],
    folds: &[SplitIndices],
) -> Result<TrialResult> {
    let mut fold_auc = Vec::with_capacity(folds.len());
    let mut fold_accuracy = Vec::with_capacity(folds.len());

    for fold in folds {
        let train_x = features.select_rows(&fold.train);
        let train_y: Vec<u8> = fold.train.iter().map(|&i| labels[i]).collect();
        let valid_x = features.select_rows(&fold.test);
        let valid_y: Vec<u8> = fold.test.iter().map(|&i| labels[i]).collect();

        let mut model = F::create(&params)?;
        model.fit(&train_x, &train_y)?;
        let probabilities = model.predict_proba(&valid_x)?;
        let predicted = model.predict(&valid_x)?;

        let auc = roc_auc(&valid_y, &probabilities).ok_or_else(|| {
            PipelineError::Training("validation fold holds a single class".to_string())
        })?;
        fold_auc.push(auc);
        fold_accuracy.push(accuracy(&valid_y, &predicted));
    }

    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
    let trial = TrialResult {
        mean_auc: mean(&fold_auc),
        mean_accuracy: mean(&fold_accuracy),
        fold_auc,
        params,
    };
    debug!(
        mean_auc = trial.mean_auc,
        mean_accuracy = trial.mean_accuracy,
        "Trial scored"
    );
    Ok(trial)
}
