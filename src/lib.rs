pub mod config;
pub mod data_loader;
pub mod error;
pub mod evaluate;
pub mod feature_engineering;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod predict;
pub mod report;
pub mod split;

pub use config::Config;
pub use data_loader::DataLoader;
pub use error::PipelineError;
pub use feature_engineering::FeatureEngineer;
pub use models::{Classifier, GradientBoostedClassifier};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
