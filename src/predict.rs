use polars::prelude::*;
use std::path::Path;
use tracing::info;

use crate::data_loader::{column_strings, ACCOUNT_KEY};
use crate::error::{PipelineError, Result};
use crate::feature_engineering::FeatureMatrix;
use crate::metrics::label_for;
use crate::models::traits::Classifier;

pub const PROBABILITY_COLUMN: &str = "pred_probs";
pub const LABEL_COLUMN: &str = "pred_labels";

pub struct Predictor<'a> {
    model: &'a dyn Classifier,
    feature_names: &'a [String],
}

impl<'a> Predictor<'a> {
    /// `feature_names` is the column order the model was trained on.
    pub fn new(model: &'a dyn Classifier, feature_names: &'a [String]) -> Self {
        Self {
            model,
            feature_names,
        }
    }

    /// Scores every holdout row and returns the holdout table with
    /// `pred_probs` and `pred_labels` appended.
    pub fn score_holdout(&self, holdout: &DataFrame, features: &FeatureMatrix) -> Result<DataFrame> {
        if features.n_rows() != holdout.height() {
            return Err(PipelineError::Schema(format!(
                "{} holdout feature rows but {} holdout rows",
                features.n_rows(),
                holdout.height()
            )));
        }
        let aligned = features.align_to(self.feature_names);
        let probabilities = self.model.predict_proba(&aligned)?;
        let labels: Vec<i32> = probabilities
            .iter()
            .map(|&p| i32::from(label_for(p)))
            .collect();

        let mut scored = holdout.clone();
        scored.with_column(Series::new(PROBABILITY_COLUMN.into(), probabilities))?;
        scored.with_column(Series::new(LABEL_COLUMN.into(), labels))?;
        Ok(scored)
    }
}

/// Collapses scored rows to one row per account, keeping the highest
/// probability and the highest label seen for it, ordered by account.
/// Any row predicting default flags the account.
pub fn aggregate_by_account(scored: &DataFrame) -> Result<DataFrame> {
    let missing = scored
        .column(ACCOUNT_KEY)?
        .as_materialized_series()
        .null_count();
    if missing > 0 {
        return Err(PipelineError::Schema(format!(
            "{} holdout rows have no '{}'",
            missing, ACCOUNT_KEY
        )));
    }

    let accounts = scored
        .clone()
        .lazy()
        .group_by([col(ACCOUNT_KEY)])
        .agg([col(PROBABILITY_COLUMN).max(), col(LABEL_COLUMN).max()])
        .sort([ACCOUNT_KEY], SortMultipleOptions::default())
        .collect()?;
    Ok(accounts)
}

/// Writes `,mg_acc,pred_probs,pred_labels` with a leading 0-based row index.
pub fn write_predictions<P: AsRef<Path>>(path: P, predictions: &DataFrame) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let accounts = column_strings(predictions, ACCOUNT_KEY)?;
    let probabilities = predictions
        .column(PROBABILITY_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let labels = predictions
        .column(LABEL_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::Int64)?;

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["", ACCOUNT_KEY, PROBABILITY_COLUMN, LABEL_COLUMN])?;
    for (index, ((account, probability), label)) in accounts
        .into_iter()
        .zip(probabilities.f64()?)
        .zip(labels.i64()?)
        .enumerate()
    {
        writer.write_record([
            index.to_string(),
            account.unwrap_or_default(),
            probability.map(|p| p.to_string()).unwrap_or_default(),
            label.map(|l| l.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    info!(path = %path.display(), accounts = predictions.height(), "Predictions written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(accounts: &[i64], probabilities: &[f64]) -> DataFrame {
        let labels: Vec<i32> = probabilities
            .iter()
            .map(|&p| i32::from(label_for(p)))
            .collect();
        df!(
            ACCOUNT_KEY => accounts,
            PROBABILITY_COLUMN => probabilities,
            LABEL_COLUMN => labels,
        )
        .unwrap()
    }

    fn rows(df: &DataFrame) -> Vec<(String, f64, i64)> {
        let accounts = column_strings(df, ACCOUNT_KEY).unwrap();
        let probabilities = df
            .column(PROBABILITY_COLUMN)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .clone();
        let labels = df
            .column(LABEL_COLUMN)
            .unwrap()
            .as_materialized_series()
            .cast(&DataType::Int64)
            .unwrap();
        accounts
            .into_iter()
            .zip(&probabilities)
            .zip(labels.i64().unwrap())
            .map(|((a, p), l)| (a.unwrap(), p.unwrap(), l.unwrap()))
            .collect()
    }

    #[test]
    fn test_aggregation_keeps_worst_case_per_account() {
        let aggregated = aggregate_by_account(&scored(&[7, 3, 7], &[0.3, 0.2, 0.7])).unwrap();
        assert_eq!(
            rows(&aggregated),
            vec![("3".to_string(), 0.2, 0), ("7".to_string(), 0.7, 1)]
        );
    }

    #[test]
    fn test_single_row_account_is_its_own_max() {
        let aggregated = aggregate_by_account(&scored(&[1], &[0.45])).unwrap();
        assert_eq!(rows(&aggregated), vec![("1".to_string(), 0.45, 0)]);
    }

    #[test]
    fn test_integer_accounts_sort_numerically() {
        let aggregated = aggregate_by_account(&scored(&[10, 9], &[0.1, 0.1])).unwrap();
        let ordered: Vec<String> = rows(&aggregated).into_iter().map(|r| r.0).collect();
        assert_eq!(ordered, vec!["9", "10"]);
    }

    #[test]
    fn test_null_account_is_schema_error() {
        let df = df!(
            ACCOUNT_KEY => [Some(1i64), None],
            PROBABILITY_COLUMN => [0.1, 0.2],
            LABEL_COLUMN => [0i32, 0],
        )
        .unwrap();
        assert!(matches!(aggregate_by_account(&df), Err(PipelineError::Schema(_))));
    }

    struct FirstColumn;

    impl Classifier for FirstColumn {
        fn fit(&mut self, _: &FeatureMatrix, _: &[u8]) -> Result<()> {
            Ok(())
        }

        fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(features.values.column(0).to_vec())
        }
    }

    #[test]
    fn test_score_holdout_appends_prediction_columns_in_training_order() {
        let trained_on = vec!["p".to_string(), "other".to_string()];
        let holdout = df!(ACCOUNT_KEY => [1i64, 1], "Sample" => ["Holdout", "Holdout"]).unwrap();
        let features = FeatureMatrix {
            names: vec!["other".to_string(), "p".to_string()],
            values: ndarray::array![[9.0, 0.2], [9.0, 0.8]],
        };
        let scored = Predictor::new(&FirstColumn, &trained_on)
            .score_holdout(&holdout, &features)
            .unwrap();

        assert_eq!(scored.height(), 2);
        assert!(scored.column("Sample").is_ok());
        assert_eq!(
            rows(&scored),
            vec![("1".to_string(), 0.2, 0), ("1".to_string(), 0.8, 1)]
        );
    }

    #[test]
    fn test_score_holdout_rejects_row_mismatch() {
        let holdout = df!(ACCOUNT_KEY => [1i64]).unwrap();
        let features = FeatureMatrix {
            names: vec!["p".to_string()],
            values: ndarray::array![[0.1], [0.2]],
        };
        let result = Predictor::new(&FirstColumn, &features.names).score_holdout(&holdout, &features);
        assert!(matches!(result, Err(PipelineError::Schema(_))));
    }

    #[test]
    fn test_written_csv_has_index_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/final_predictions.csv");
        write_predictions(&path, &scored(&[3, 4], &[0.25, 0.75])).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], ",mg_acc,pred_probs,pred_labels");
        assert_eq!(lines[1], "0,3,0.25,0");
        assert_eq!(lines[2], "1,4,0.75,1");
    }
}
