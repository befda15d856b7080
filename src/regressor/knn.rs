//! k-nearest neighbour regression.
use crate::constants::{KNN_DEFAULT_NEIGHBOURS, KNN_DEFAULT_SCALE_FRAC, KNN_DEFAULT_SIGMA_FACT};
use crate::data::Matrix;
use crate::errors::CalibrationError;
use crate::method::MethodOptions;
use crate::regressor::Regressor;
use crate::utils::{percentiles, validate_float_parameter, validate_positive_float_parameter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub neighbours: usize,
    /// Central quantile range used to scale each input. `0` disables scaling.
    pub scale_frac: f64,
    pub use_kernel: bool,
    pub sigma_fact: f64,
}

impl Default for KnnParams {
    fn default() -> Self {
        KnnParams {
            neighbours: KNN_DEFAULT_NEIGHBOURS,
            scale_frac: KNN_DEFAULT_SCALE_FRAC,
            use_kernel: false,
            sigma_fact: KNN_DEFAULT_SIGMA_FACT,
        }
    }
}

impl KnnParams {
    pub fn from_options(options: &MethodOptions) -> Result<Self, CalibrationError> {
        let params = KnnParams {
            neighbours: options.get_usize("nkNN", KNN_DEFAULT_NEIGHBOURS)?,
            scale_frac: options.get_f64("ScaleFrac", KNN_DEFAULT_SCALE_FRAC)?,
            use_kernel: options.flag("UseKernel", false)?,
            sigma_fact: options.get_f64("SigmaFact", KNN_DEFAULT_SIGMA_FACT)?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.neighbours == 0 {
            return Err(CalibrationError::InvalidParameter(
                "nkNN".to_string(),
                "at least one neighbour".to_string(),
                "0".to_string(),
            ));
        }
        validate_float_parameter(self.scale_frac, 0.0, 1.0, "ScaleFrac")?;
        validate_positive_float_parameter(self.sigma_fact, "SigmaFact")
    }
}

/// The scaled training sample itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    pub params: KnnParams,
    pub scales: Vec<f64>,
    /// Row major scaled training points.
    pub points: Vec<f64>,
    pub targets: Vec<f64>,
    pub n_features: usize,
}

impl KnnModel {
    pub fn fit(params: &KnnParams, data: &Matrix<f64>, y: &[f64]) -> Result<Self, CalibrationError> {
        let scales: Vec<f64> = (0..data.cols)
            .map(|j| {
                if params.scale_frac <= 0.0 {
                    return 1.0;
                }
                let lo = 0.5 - 0.5 * params.scale_frac;
                let hi = 0.5 + 0.5 * params.scale_frac;
                let p = percentiles(data.get_col(j), &[lo, hi]);
                match p.as_slice() {
                    [a, b] if b > a => b - a,
                    _ => 1.0,
                }
            })
            .collect();
        let mut points = Vec::with_capacity(data.rows * data.cols);
        for i in 0..data.rows {
            points.extend(data.get_row_iter(i).zip(scales.iter()).map(|(v, s)| v / s));
        }
        Ok(KnnModel {
            params: params.clone(),
            scales,
            points,
            targets: y.to_vec(),
            n_features: data.cols,
        })
    }

    /// Check a model that did not come from [`KnnModel::fit`].
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.params.validate()?;
        if self.scales.len() != self.n_features || self.points.len() != self.targets.len() * self.n_features {
            return Err(CalibrationError::InvalidParameter(
                "KNN training points".to_string(),
                format!("{} values of {} inputs", self.targets.len() * self.n_features, self.n_features),
                self.points.len().to_string(),
            ));
        }
        Ok(())
    }

    fn distances(&self, features: &[f64]) -> Vec<(f64, usize)> {
        let query: Vec<f64> = features.iter().zip(self.scales.iter()).map(|(v, s)| v / s).collect();
        self.points
            .chunks(self.n_features.max(1))
            .enumerate()
            .map(|(i, p)| {
                let d2: f64 = p.iter().zip(query.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (d2, i)
            })
            .collect()
    }
}

impl Regressor for KnnModel {
    fn predict(&self, features: &[f64]) -> f64 {
        if self.targets.is_empty() || self.params.neighbours == 0 {
            return f64::NAN;
        }
        let mut distances = self.distances(features);
        let k = self.params.neighbours.min(distances.len());
        distances.select_nth_unstable_by(k - 1, |a, b| a.0.total_cmp(&b.0));
        let nearest = &distances[..k];
        if self.params.use_kernel {
            let radius2 = nearest.iter().map(|d| d.0).fold(0.0, f64::max);
            let width2 = radius2 * self.params.sigma_fact * self.params.sigma_fact;
            if width2 > 0.0 {
                let (mut sw, mut swy) = (0.0, 0.0);
                for (d2, i) in nearest {
                    let w = (-0.5 * d2 / width2).exp();
                    sw += w;
                    swy += w * self.targets[*i];
                }
                if sw > 0.0 {
                    return swy / sw;
                }
            }
        }
        nearest.iter().map(|(_, i)| self.targets[*i]).sum::<f64>() / k as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_mean() {
        // one feature, targets equal to the feature
        let data = vec![0.0, 1.0, 2.0, 3.0, 10.0];
        let m = Matrix::new(&data, 5, 1);
        let params = KnnParams {
            neighbours: 2,
            scale_frac: 0.0,
            ..Default::default()
        };
        let model = KnnModel::fit(&params, &m, &data).unwrap();
        assert_eq!(model.predict(&[0.1]), 0.5);
        assert_eq!(model.predict(&[9.0]), 6.5);
    }

    #[test]
    fn test_kernel_favours_closer_points() {
        let data = vec![0.0, 1.0, 4.0];
        let y = vec![0.0, 1.0, 4.0];
        let m = Matrix::new(&data, 3, 1);
        let params = KnnParams {
            neighbours: 3,
            scale_frac: 0.0,
            use_kernel: true,
            sigma_fact: 0.5,
        };
        let model = KnnModel::fit(&params, &m, &y).unwrap();
        let p = model.predict(&[0.0]);
        assert!(p < 5.0 / 3.0);
        assert!(p > 0.0);
    }

    #[test]
    fn test_validate_loaded_model() {
        let data = vec![0.0, 1.0, 2.0];
        let m = Matrix::new(&data, 3, 1);
        let mut model = KnnModel::fit(&KnnParams::default(), &m, &data).unwrap();
        assert!(model.validate().is_ok());
        model.params.neighbours = 0;
        assert!(model.validate().is_err());
        assert!(model.predict(&[1.0]).is_nan());
        model.params.neighbours = 1;
        model.points.pop();
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_options() {
        let options = MethodOptions::parse("nkNN=5:UseKernel=T:ScaleFrac=0.5").unwrap();
        let params = KnnParams::from_options(&options).unwrap();
        assert_eq!(params.neighbours, 5);
        assert!(params.use_kernel);
        let bad = MethodOptions::parse("ScaleFrac=2").unwrap();
        assert!(KnnParams::from_options(&bad).is_err());
    }
}
