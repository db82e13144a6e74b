use crate::error::Result;
use crate::feature_engineering::FeatureMatrix;
use crate::metrics::label_for;
use crate::models::xgboost::BoosterParams;

pub trait Classifier {
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()>;

    /// Probability of the positive class for every row.
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(label_for)
            .collect())
    }
}

pub trait ModelFactory {
    type ModelType: Classifier;

    fn create(params: &BoosterParams) -> Result<Self::ModelType>;
}
