use crate::constants::HESSIAN_EPS;
use crate::errors::CalibrationError;
use std::collections::VecDeque;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    let mut s = String::new();
    for i in items {
        s.push_str(i);
        s.push_str(&String::from(", "));
    }
    s
}

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), CalibrationError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}

pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), CalibrationError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(CalibrationError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Sample mean and root mean square deviation (population form).
///
/// Returns `None` for an empty slice.
pub fn mean_rms(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some((mean, var.max(0.0).sqrt()))
}

/// Naive percentiles calculation.
///
/// * `v` - Values to find percentiles for. NaN values are ignored.
/// * `percentiles` - Percentiles to look for in the data. This should be
///   values from 0 to 1, and in sorted order.
pub fn percentiles(v: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = v.iter().copied().filter(|x| !x.is_nan()).collect();
    if sorted.is_empty() || percentiles.is_empty() {
        return Vec::new();
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let mut pcts = VecDeque::from_iter(percentiles.iter());
    let mut p = Vec::with_capacity(percentiles.len());
    let total = sorted.len() as f64;
    let mut cuml_pct = 0.0;
    let mut current_pct = match pcts.pop_front() {
        Some(c) => *c,
        None => return p,
    };
    for value in sorted.iter() {
        cuml_pct += 1.0 / total;
        // The same number might be a valid value for several percentiles.
        while cuml_pct >= current_pct - f64::EPSILON {
            p.push(*value);
            match pcts.pop_front() {
                Some(p_) => current_pct = *p_,
                None => return p,
            }
        }
    }
    // Remaining percentiles sit at the top of the distribution.
    if let Some(last) = sorted.last() {
        while p.len() < percentiles.len() {
            p.push(*last);
        }
    }
    p
}

/// Calculate the weight of a given node, given the sum
/// of the gradients, and the hessians in a node.
#[inline]
pub fn weight(gradient_sum: f64, hessian_sum: f64) -> f64 {
    -gradient_sum / (hessian_sum + HESSIAN_EPS)
}

/// Calculate the gain given the gradient and hessian of the node.
#[inline]
pub fn gain(gradient_sum: f64, hessian_sum: f64) -> f64 {
    (gradient_sum * gradient_sum) / (hessian_sum + HESSIAN_EPS) // no -0.5 multiplier term!
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let v = vec![4., 5., 6., 1., 2., 3., 7., 8., 9., 10.];
        let p = vec![0.3, 0.5, 0.75, 1.0];
        let p = percentiles(&v, &p);
        assert_eq!(p, vec![3.0, 5.0, 8.0, 10.0]);
        assert!(percentiles(&[], &[0.5]).is_empty());
    }

    #[test]
    fn test_mean_rms() {
        let (mean, rms) = mean_rms(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(mean, 2.5);
        assert!((rms - 1.25_f64.sqrt()).abs() < 1e-12);
        assert!(mean_rms(&[]).is_none());
    }

    #[test]
    fn test_weight_and_gain() {
        assert!((weight(-6.0, 3.0) - 2.0).abs() < 1e-9);
        assert!((gain(-6.0, 3.0) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_float_parameter() {
        assert!(validate_float_parameter(0.5, 0.0, 1.0, "Shrinkage").is_ok());
        assert!(matches!(
            validate_float_parameter(1.5, 0.0, 1.0, "Shrinkage"),
            Err(CalibrationError::InvalidParameter(p, _, v)) if p == "Shrinkage" && v == "1.5"
        ));
        assert!(validate_positive_float_parameter(f64::NAN, "x").is_err());
    }
}
