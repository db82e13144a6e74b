pub mod search;
pub mod trainer;
pub mod traits;
pub mod xgboost;

pub use self::xgboost::{BoosterParams, EvalCurve, EvalHistory, EvalSet, GradientBoostedClassifier};
pub use search::{ParamGrid, RandomizedSearch, SearchResult, TrialResult};
pub use trainer::{TunedModel, Trainer};
pub use traits::{Classifier, ModelFactory};
