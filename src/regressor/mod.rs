//! Regressors
//!
//! Built-in regression backend. Each method kind has a parameter set, parsed
//! from the method's option string, and a fitted model that maps a feature
//! vector to one target value.
pub mod bdt;
pub mod knn;
pub mod linear;
pub mod mlp;

use crate::data::Matrix;
use crate::errors::CalibrationError;
use crate::method::{MethodKind, MethodOptions};
use serde::{Deserialize, Serialize};

pub use bdt::{BdtModel, BdtParams};
pub use knn::{KnnModel, KnnParams};
pub use linear::LinearModel;
pub use mlp::{MlpModel, MlpParams};

/// A fitted single-target model.
pub trait Regressor {
    /// Predict the target for one feature vector.
    fn predict(&self, features: &[f64]) -> f64;
}

/// Training parameters, one variant per method kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegressorConfig {
    Linear,
    Knn(KnnParams),
    Mlp(MlpParams),
    Bdt(BdtParams),
}

impl RegressorConfig {
    pub fn from_options(kind: MethodKind, options: &MethodOptions) -> Result<Self, CalibrationError> {
        match kind {
            MethodKind::LD => Ok(RegressorConfig::Linear),
            MethodKind::KNN => Ok(RegressorConfig::Knn(KnnParams::from_options(options)?)),
            MethodKind::MLP => Ok(RegressorConfig::Mlp(MlpParams::from_options(options)?)),
            MethodKind::BDTG => Ok(RegressorConfig::Bdt(BdtParams::from_options(options)?)),
        }
    }

    /// Fit one model.
    ///
    /// * `data` - Column major feature matrix, one row per event.
    /// * `y` - Target value per row.
    /// * `seed` - Seed for every stochastic step of the fit.
    pub fn fit(&self, data: &Matrix<f64>, y: &[f64], seed: u64) -> Result<Model, CalibrationError> {
        if data.rows == 0 || data.rows != y.len() {
            return Err(CalibrationError::InvalidParameter(
                "training sample".to_string(),
                format!("{} target values", data.rows),
                y.len().to_string(),
            ));
        }
        match self {
            RegressorConfig::Linear => Ok(Model::Linear(LinearModel::fit(data, y)?)),
            RegressorConfig::Knn(p) => Ok(Model::Knn(KnnModel::fit(p, data, y)?)),
            RegressorConfig::Mlp(p) => Ok(Model::Mlp(MlpModel::fit(p, data, y, seed)?)),
            RegressorConfig::Bdt(p) => Ok(Model::Bdt(BdtModel::fit(p, data, y, seed)?)),
        }
    }
}

/// A fitted model of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Linear(LinearModel),
    Knn(KnnModel),
    Mlp(MlpModel),
    Bdt(BdtModel),
}

impl Regressor for Model {
    fn predict(&self, features: &[f64]) -> f64 {
        match self {
            Model::Linear(m) => m.predict(features),
            Model::Knn(m) => m.predict(features),
            Model::Mlp(m) => m.predict(features),
            Model::Bdt(m) => m.predict(features),
        }
    }
}

/// Everything persisted for one trained method: the feature and target
/// names it was trained on, and one model per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub method: String,
    pub kind: MethodKind,
    pub features: Vec<String>,
    pub targets: Vec<String>,
    pub models: Vec<Model>,
}

impl Model {
    /// Structural check of a model read back from an artifact.
    pub fn validate(&self, n_features: usize) -> Result<(), CalibrationError> {
        let inputs = match self {
            Model::Linear(m) => m.coefficients.len(),
            Model::Knn(m) => {
                m.validate()?;
                m.n_features
            }
            Model::Mlp(_) | Model::Bdt(_) => n_features,
        };
        if inputs != n_features {
            return Err(CalibrationError::InvalidParameter(
                "model inputs".to_string(),
                n_features.to_string(),
                inputs.to_string(),
            ));
        }
        Ok(())
    }
}

impl TrainedModel {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.models.iter().try_for_each(|m| m.validate(self.features.len()))
    }

    /// Predictions for every target, in target order.
    pub fn predict(&self, features: &[f64]) -> Vec<f64> {
        self.models.iter().map(|m| m.predict(features)).collect()
    }
}

/// Root mean squared error of `model` over the rows of `data`.
pub fn rms_error(model: &Model, data: &Matrix<f64>, y: &[f64]) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    let sse: f64 = (0..data.rows)
        .map(|i| {
            let d = model.predict(&data.get_row(i)) - y[i];
            d * d
        })
        .sum();
    (sse / y.len() as f64).sqrt()
}

/// Per column `(mean, std)` used to standardise inputs. Constant columns
/// get a unit scale.
pub(crate) fn standardisation(data: &Matrix<f64>) -> Vec<(f64, f64)> {
    (0..data.cols)
        .map(|j| {
            let (mean, rms) = crate::utils::mean_rms(data.get_col(j)).unwrap_or((0.0, 1.0));
            (mean, if rms > 0.0 { rms } else { 1.0 })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_data {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// `y = 1.5 + 2 x0 - 0.5 x1` on uniform inputs, column major.
    pub fn linear_sample(n: usize, seed: u64) -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x0: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
        let x1: Vec<f64> = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
        let y: Vec<f64> = x0.iter().zip(x1.iter()).map(|(a, b)| 1.5 + 2.0 * a - 0.5 * b).collect();
        let mut data = x0;
        data.extend(x1);
        (data, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_dispatch() {
        let (data, y) = test_data::linear_sample(200, 3);
        let m = Matrix::new(&data, 200, 2);
        let options = MethodOptions::parse("nkNN=5").unwrap();
        for kind in [MethodKind::LD, MethodKind::KNN] {
            let config = RegressorConfig::from_options(kind, &options).unwrap();
            let model = config.fit(&m, &y, 0).unwrap();
            assert!(rms_error(&model, &m, &y) < 2.5, "{:?}", kind);
        }
    }

    #[test]
    fn test_fit_rejects_mismatched_sample() {
        let data = vec![1.0, 2.0];
        let m = Matrix::new(&data, 2, 1);
        assert!(RegressorConfig::Linear.fit(&m, &[1.0], 0).is_err());
    }
}
