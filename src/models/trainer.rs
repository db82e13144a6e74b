use tracing::{info, instrument};

use super::xgboost::{BoosterParams, EvalSet, GradientBoostedClassifier};
use super::search::{ParamGrid, RandomizedSearch, SearchResult};
use crate::config::Config;
use crate::error::Result;
use crate::feature_engineering::FeatureMatrix;

/// The refit winner of a hyperparameter search, with the search record.
#[derive(Debug)]
pub struct TunedModel {
    pub model: GradientBoostedClassifier,
    pub search: SearchResult,
}

/// Fits the fixed-configuration baseline and the tuned model.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub seed: u64,
    pub baseline_estimators: usize,
    pub grid: ParamGrid,
    pub n_iter: usize,
    pub n_folds: usize,
}

impl Trainer {
    pub fn from_config(config: &Config) -> Self {
        Self {
            seed: config.split.seed,
            baseline_estimators: config.baseline.n_estimators,
            grid: ParamGrid::default(),
            n_iter: config.search.n_iter,
            n_folds: config.search.n_folds,
        }
    }

    pub fn baseline_params(&self) -> BoosterParams {
        BoosterParams {
            n_estimators: self.baseline_estimators,
            seed: self.seed,
            ..BoosterParams::default()
        }
    }

    /// Fixed configuration, tracking AUC and error on both sets every round.
    #[instrument(skip_all)]
    pub fn fit_baseline(
        &self,
        x_train: &FeatureMatrix,
        y_train: &[u8],
        x_test: &FeatureMatrix,
        y_test: &[u8],
    ) -> Result<GradientBoostedClassifier> {
        let mut model = GradientBoostedClassifier::new(self.baseline_params());
        let eval_sets = [
            EvalSet {
                name: "train",
                features: x_train,
                labels: y_train,
            },
            EvalSet {
                name: "test",
                features: x_test,
                labels: y_test,
            },
        ];
        model.fit_with_eval(x_train, y_train, &eval_sets)?;
        info!(trees = model.n_trees(), "Baseline model fitted");
        Ok(model)
    }

    /// Randomized search with stratified k-fold CV, refit on all of `x_train`.
    pub fn tune(&self, x_train: &FeatureMatrix, y_train: &[u8]) -> Result<TunedModel> {
        self.tune_with_eval(x_train, y_train, &[])
    }

    /// Like [`Trainer::tune`], recording per-round metrics for `eval_sets` during the refit.
    #[instrument(skip_all)]
    pub fn tune_with_eval(
        &self,
        x_train: &FeatureMatrix,
        y_train: &[u8],
        eval_sets: &[EvalSet<'_>],
    ) -> Result<TunedModel> {
        let search = RandomizedSearch::new(self.grid.clone(), self.n_iter, self.n_folds, self.seed)
            .run::<GradientBoostedClassifier>(x_train, y_train)?;

        let mut model = GradientBoostedClassifier::new(search.best_params.clone());
        model.fit_with_eval(x_train, y_train, eval_sets)?;
        info!(trees = model.n_trees(), "Tuned model refitted");
        Ok(TunedModel { model, search })
    }
}
