//! Linear least squares with intercept.
use crate::data::Matrix;
use crate::errors::CalibrationError;
use crate::regressor::Regressor;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);
    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }
    None
}

impl LinearModel {
    pub fn fit(data: &Matrix<f64>, y: &[f64]) -> Result<Self, CalibrationError> {
        let rows = data.rows;
        let cols = data.cols + 1;
        let x = DMatrix::from_fn(rows, cols, |i, j| if j == 0 { 1.0 } else { *data.get(i, j - 1) });
        let y = DVector::from_column_slice(y);
        let beta = solve_least_squares(&x, &y).ok_or_else(|| {
            CalibrationError::InvalidParameter(
                "LD training sample".to_string(),
                "a solvable least squares system".to_string(),
                format!("{} rows x {} columns", rows, cols),
            )
        })?;
        Ok(LinearModel {
            intercept: beta[0],
            coefficients: beta.iter().skip(1).copied().collect(),
        })
    }
}

impl Regressor for LinearModel {
    fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features.iter())
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regressor::test_data::linear_sample;

    #[test]
    fn test_recovers_coefficients() {
        let (data, y) = linear_sample(100, 11);
        let m = Matrix::new(&data, 100, 2);
        let model = LinearModel::fit(&m, &y).unwrap();
        assert!((model.intercept - 1.5).abs() < 1e-8);
        assert!((model.coefficients[0] - 2.0).abs() < 1e-8);
        assert!((model.coefficients[1] + 0.5).abs() < 1e-8);
        assert!((model.predict(&[1.0, 2.0]) - 2.5).abs() < 1e-8);
    }

    #[test]
    fn test_simple_system() {
        // y = 2 + 3x on x = [0,1,2]
        let data = vec![0.0, 1.0, 2.0];
        let m = Matrix::new(&data, 3, 1);
        let model = LinearModel::fit(&m, &[2.0, 5.0, 8.0]).unwrap();
        assert!((model.intercept - 2.0).abs() < 1e-10);
        assert!((model.coefficients[0] - 3.0).abs() < 1e-10);
    }
}
