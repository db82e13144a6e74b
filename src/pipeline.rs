//! The end-to-end run: load, join, engineer, split, train, evaluate, predict, report.

use std::path::PathBuf;
use tracing::{info, instrument};

use crate::config::Config;
use crate::data_loader::{join_tables, DataLoader, JoinReport};
use crate::error::Result;
use crate::evaluate::{Evaluation, Evaluator};
use crate::feature_engineering::{encode_target, feature_matrix, FeatureEngineer, FeatureReport};
use crate::models::xgboost::{BoosterParams, EvalSet};
use crate::models::trainer::Trainer;
use crate::predict::{aggregate_by_account, write_predictions, Predictor};
use crate::report::render_feature_importance;
use crate::split::{partition_holdout, stratified_split};

/// What a run produced, for logging and for tests.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub join: JoinReport,
    pub features: FeatureReport,
    pub modeling_rows: usize,
    pub holdout_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub baseline: Evaluation,
    pub tuned: Evaluation,
    pub best_params: BoosterParams,
    pub best_cv_auc: f64,
    pub predicted_accounts: usize,
    pub predictions_path: PathBuf,
    pub importance_chart_path: PathBuf,
    pub curve_paths: Vec<PathBuf>,
}

#[instrument(skip_all)]
pub fn run(config: &Config) -> Result<PipelineSummary> {
    info!("Loading input tables");
    let tables = DataLoader::new(&config.data).load_tables()?;
    let (joined, join) = join_tables(&tables)?;

    let (engineered, features) = FeatureEngineer::default().engineer(joined)?;
    let (modeling, holdout) = partition_holdout(&engineered)?;

    let x = feature_matrix(&modeling)?;
    let y = encode_target(&modeling)?;
    let split = stratified_split(&y, config.split.test_fraction, config.split.seed)?;
    let x_train = x.select_rows(&split.train);
    let x_test = x.select_rows(&split.test);
    let y_train: Vec<u8> = split.train.iter().map(|&i| y[i]).collect();
    let y_test: Vec<u8> = split.test.iter().map(|&i| y[i]).collect();
    info!(
        modeling = modeling.height(),
        holdout = holdout.height(),
        train = y_train.len(),
        test = y_test.len(),
        features = x.n_features(),
        "Data split"
    );

    let trainer = Trainer::from_config(config);
    let evaluator = Evaluator::new(config.output.curves_dir.as_deref());
    let mut curve_paths = Vec::new();

    info!("Fitting baseline model");
    let baseline_model = trainer.fit_baseline(&x_train, &y_train, &x_test, &y_test)?;
    let baseline = evaluator.evaluate(
        "baseline",
        &baseline_model,
        &x_train,
        &y_train,
        &x_test,
        &y_test,
    )?;
    println!("{}", baseline);
    curve_paths.extend(evaluator.show_learning_curves("baseline", baseline_model.history())?);

    info!("Tuning hyperparameters");
    let eval_sets = [
        EvalSet {
            name: "train",
            features: &x_train,
            labels: &y_train,
        },
        EvalSet {
            name: "test",
            features: &x_test,
            labels: &y_test,
        },
    ];
    let tuned_model = trainer.tune_with_eval(&x_train, &y_train, &eval_sets)?;
    println!("Best score: {:.4}", tuned_model.search.best_score);
    println!("Best model: {:?}", tuned_model.search.best_params);

    let tuned = evaluator.evaluate(
        "tuned",
        &tuned_model.model,
        &x_train,
        &y_train,
        &x_test,
        &y_test,
    )?;
    println!("{}", tuned);
    curve_paths.extend(evaluator.show_learning_curves("tuned", tuned_model.model.history())?);

    info!("Scoring holdout");
    let holdout_features = feature_matrix(&holdout)?;
    let scored = Predictor::new(&tuned_model.model, tuned_model.model.feature_names())
        .score_holdout(&holdout, &holdout_features)?;
    let predictions = aggregate_by_account(&scored)?;
    write_predictions(&config.output.predictions_path, &predictions)?;

    render_feature_importance(
        &config.output.importance_chart_path,
        &tuned_model.model.feature_importance_weight()?,
    )?;

    Ok(PipelineSummary {
        join,
        features,
        modeling_rows: modeling.height(),
        holdout_rows: holdout.height(),
        train_rows: y_train.len(),
        test_rows: y_test.len(),
        baseline,
        tuned,
        best_params: tuned_model.search.best_params,
        best_cv_auc: tuned_model.search.best_score,
        predicted_accounts: predictions.height(),
        predictions_path: PathBuf::from(&config.output.predictions_path),
        importance_chart_path: PathBuf::from(&config.output.importance_chart_path),
        curve_paths,
    })
}
