//! Gaussian Fit
//!
//! Chi-square fit of `A * exp(-0.5 * ((x - mean) / sigma)^2)` to binned
//! data by Levenberg-Marquardt. Empty bins do not enter the chi-square.
use crate::constants::{FIT_ITERATION_LIMIT, FIT_LAMBDA_INIT, FIT_MIN_POINTS, FIT_TOLERANCE};
use crate::histogram::Histogram;
use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("{0} non-empty bins in the fit window, at least {1} required")]
    TooFewPoints(usize, usize),
    #[error("curvature matrix is singular")]
    Singular,
    #[error("fit did not converge after {0} iterations")]
    NotConverged(usize),
    #[error("fit produced non-finite parameters")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
    pub amplitude_err: f64,
    pub mean_err: f64,
    pub sigma_err: f64,
    pub chi2: f64,
    pub ndf: usize,
    pub iterations: usize,
}

#[inline]
fn gaussian(x: f64, p: &Vector3<f64>) -> f64 {
    let z = (x - p[1]) / p[2];
    p[0] * (-0.5 * z * z).exp()
}

#[inline]
fn gradient(x: f64, p: &Vector3<f64>) -> Vector3<f64> {
    let z = (x - p[1]) / p[2];
    let e = (-0.5 * z * z).exp();
    Vector3::new(e, p[0] * e * z / p[2], p[0] * e * z * z / p[2])
}

struct Point {
    x: f64,
    y: f64,
    inv_err2: f64,
}

fn chi2(points: &[Point], p: &Vector3<f64>) -> f64 {
    points
        .iter()
        .map(|pt| {
            let r = pt.y - gaussian(pt.x, p);
            r * r * pt.inv_err2
        })
        .sum()
}

/// Curvature matrix `J^T W J` and gradient vector `J^T W r`.
fn normal_equations(points: &[Point], p: &Vector3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let mut alpha = Matrix3::zeros();
    let mut beta = Vector3::zeros();
    for pt in points {
        let g = gradient(pt.x, p);
        let r = pt.y - gaussian(pt.x, p);
        alpha += g * g.transpose() * pt.inv_err2;
        beta += g * (r * pt.inv_err2);
    }
    (alpha, beta)
}

/// Fit a Gaussian to the bins of `hist` whose centers lie in `[low, high]`.
///
/// * `initial` - Starting `(amplitude, mean, sigma)`.
pub fn fit_gaussian(hist: &Histogram, low: f64, high: f64, initial: (f64, f64, f64)) -> Result<GaussianFit, FitError> {
    let points: Vec<Point> = hist
        .points()
        .filter(|(x, y, e)| *x >= low && *x <= high && *y > 0.0 && *e > 0.0)
        .map(|(x, y, e)| Point {
            x,
            y,
            inv_err2: 1.0 / (e * e),
        })
        .collect();
    if points.len() < FIT_MIN_POINTS {
        return Err(FitError::TooFewPoints(points.len(), FIT_MIN_POINTS));
    }
    if initial.2 == 0.0 || !initial.2.is_finite() {
        return Err(FitError::NonFinite);
    }

    let mut p = Vector3::new(initial.0, initial.1, initial.2);
    let mut current = chi2(&points, &p);
    let mut lambda = FIT_LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;
    while iterations < FIT_ITERATION_LIMIT {
        iterations += 1;
        let (alpha, beta) = normal_equations(&points, &p);
        let mut damped = alpha;
        for i in 0..3 {
            damped[(i, i)] *= 1.0 + lambda;
        }
        let step = match damped.try_inverse() {
            Some(inv) => inv * beta,
            None => return Err(FitError::Singular),
        };
        let trial = p + step;
        let trial_chi2 = chi2(&points, &trial);
        if trial_chi2.is_finite() && trial_chi2 <= current {
            let decrease = current - trial_chi2;
            p = trial;
            current = trial_chi2;
            lambda = (lambda / 10.0).max(1e-12);
            if decrease <= FIT_TOLERANCE * (current + FIT_TOLERANCE) {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            // no downhill step left
            if lambda > 1e12 {
                converged = true;
                break;
            }
        }
    }
    if !converged {
        return Err(FitError::NotConverged(iterations));
    }

    let (alpha, _) = normal_equations(&points, &p);
    let covariance = alpha.try_inverse().ok_or(FitError::Singular)?;
    let errors: Vec<f64> = (0..3).map(|i| covariance[(i, i)].max(0.0).sqrt()).collect();
    if p.iter().chain(errors.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::NonFinite);
    }
    Ok(GaussianFit {
        amplitude: p[0],
        mean: p[1],
        sigma: p[2].abs(),
        amplitude_err: errors[0],
        mean_err: errors[1],
        sigma_err: errors[2],
        chi2: current,
        ndf: points.len() - 3,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_recovers_gaussian() {
        let mut rng = StdRng::seed_from_u64(17);
        let normal = Normal::new(10.0, 1.5).unwrap();
        let mut hist = Histogram::new(60, 0.0, 20.0).unwrap();
        for _ in 0..20_000 {
            hist.fill(normal.sample(&mut rng));
        }
        let fit = fit_gaussian(&hist, 7.0, 13.0, (hist.integral(), 10.3, 1.2)).unwrap();
        assert!((fit.mean - 10.0).abs() < 0.05);
        assert!((fit.sigma - 1.5).abs() < 0.08);
        assert!(fit.mean_err > 0.0 && fit.mean_err < 0.05);
        assert!(fit.sigma_err > 0.0 && fit.sigma_err < 0.08);
        assert_eq!(fit.ndf + 3, 18);
    }

    #[test]
    fn test_too_few_points() {
        let mut hist = Histogram::new(10, 0.0, 10.0).unwrap();
        hist.fill(5.5);
        hist.fill(5.5);
        assert!(matches!(
            fit_gaussian(&hist, 0.0, 10.0, (2.0, 5.5, 0.0)),
            Err(FitError::TooFewPoints(1, _))
        ));
    }
}
