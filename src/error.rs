use polars::error::PolarsError;
use thiserror::Error;

/// Every failure the pipeline can raise. All of them abort the run.
///
/// Unmatched join keys and zero loan sizes are not errors; they are counted in
/// [`crate::data_loader::JoinReport`] and [`crate::feature_engineering::FeatureReport`].
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Data source error for '{path}': {reason}")]
    DataSource { path: String, reason: String },

    #[error("Could not parse value '{value}' in column '{column}' at row {row}")]
    Parse {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Table '{table}' has duplicate join key '{key}'; a left join would duplicate mortgage rows")]
    DuplicateKey { table: String, key: String },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Could not write output '{path}': {reason}")]
    Output { path: String, reason: String },

    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),

    #[error("Error from the XGBoost library: {0}")]
    Booster(#[from] xgboost::XGBError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
