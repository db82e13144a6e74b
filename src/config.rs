use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;
use crate::BoxError;

/// Run configuration. Every field has a default matching the fixed constants of the analysis,
/// so an absent `config.toml` still produces a complete run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataPaths,
    pub output: OutputPaths,
    pub split: SplitParams,
    pub baseline: BaselineParams,
    pub search: SearchParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub customer_path: String,
    pub fsa_path: String,
    pub mortgage_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    pub predictions_path: String,
    pub importance_chart_path: String,
    /// When set, learning curves are also saved as SVG files in this directory.
    pub curves_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitParams {
    pub seed: u64,
    pub test_fraction: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineParams {
    pub n_estimators: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub n_iter: usize,
    pub n_folds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataPaths::default(),
            output: OutputPaths::default(),
            split: SplitParams::default(),
            baseline: BaselineParams::default(),
            search: SearchParams::default(),
        }
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            customer_path: "data/CUST_DATASET_ST.csv".to_string(),
            fsa_path: "data/FSA_DATASET_ST.csv".to_string(),
            mortgage_path: "data/MG_DATASET_ST.csv".to_string(),
        }
    }
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            predictions_path: "final_predictions.csv".to_string(),
            importance_chart_path: "feature_importance.svg".to_string(),
            curves_dir: None,
        }
    }
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            seed: 1958,
            test_fraction: 0.20,
        }
    }
}

impl Default for BaselineParams {
    fn default() -> Self {
        Self { n_estimators: 500 }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            n_iter: 50,
            n_folds: 5,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BoxError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, BoxError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!("No config at {}, using defaults", path.as_ref().display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = Config::default();
        assert_eq!(config.split.seed, 1958);
        assert_eq!(config.baseline.n_estimators, 500);
        assert_eq!(config.search.n_iter, 50);
        assert_eq!(config.search.n_folds, 5);
        assert!(config.output.curves_dir.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [search]
            n_iter = 4

            [output]
            curves_dir = "plots"
            "#,
        )
        .unwrap();
        assert_eq!(config.search.n_iter, 4);
        assert_eq!(config.search.n_folds, 5);
        assert_eq!(config.output.curves_dir.as_deref(), Some("plots"));
        assert_eq!(config.data.mortgage_path, "data/MG_DATASET_ST.csv");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("definitely/not/here.toml").unwrap();
        assert_eq!(config.split.test_fraction, 0.20);
    }
}
