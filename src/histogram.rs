//! Histogram
//!
//! One dimensional, fixed width binned accumulation with per-bin sum of
//! squared weights, so that bin errors survive rescaling.
use crate::errors::CalibrationError;

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    low: f64,
    high: f64,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    underflow: f64,
    overflow: f64,
    entries: u64,
}

impl Histogram {
    pub fn new(bins: usize, low: f64, high: f64) -> Result<Self, CalibrationError> {
        if bins == 0 || !low.is_finite() || !high.is_finite() || high <= low {
            return Err(CalibrationError::InvalidParameter(
                "histogram binning".to_string(),
                "at least one bin and a finite range with low < high".to_string(),
                format!("{} bins in [{}, {})", bins, low, high),
            ));
        }
        Ok(Histogram {
            low,
            high,
            contents: vec![0.0; bins],
            sumw2: vec![0.0; bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        })
    }

    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.contents.len() as f64
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        self.low + (bin as f64 + 0.5) * self.bin_width()
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    /// Statistical error of `bin`, `sqrt(sum of w^2)`.
    pub fn error(&self, bin: usize) -> f64 {
        self.sumw2.get(bin).copied().unwrap_or(0.0).sqrt()
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, w: f64) {
        if x.is_nan() {
            return;
        }
        self.entries += 1;
        if x < self.low {
            self.underflow += w;
        } else if x >= self.high {
            self.overflow += w;
        } else {
            let bin = (((x - self.low) / self.bin_width()) as usize).min(self.contents.len() - 1);
            self.contents[bin] += w;
            self.sumw2[bin] += w * w;
        }
    }

    /// Sum of the in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    pub fn underflow(&self) -> f64 {
        self.underflow
    }

    pub fn overflow(&self) -> f64 {
        self.overflow
    }

    /// Multiply every content by `factor`, and every squared weight by `factor^2`.
    pub fn scale(&mut self, factor: f64) {
        let f2 = factor * factor;
        self.contents.iter_mut().for_each(|c| *c *= factor);
        self.sumw2.iter_mut().for_each(|s| *s *= f2);
        self.underflow *= factor;
        self.overflow *= factor;
    }

    /// Scale to unit area. Returns `false`, leaving the histogram untouched,
    /// when the integral is not positive.
    pub fn normalize(&mut self) -> bool {
        let integral = self.integral();
        if integral > 0.0 {
            self.scale(1.0 / integral);
            true
        } else {
            false
        }
    }

    /// `(center, content, error)` for every bin.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        (0..self.contents.len()).map(move |b| (self.bin_center(b), self.contents[b], self.error(b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_flow() {
        let mut h = Histogram::new(4, 0.0, 4.0).unwrap();
        for x in [0.5, 1.5, 1.7, 3.99, 4.0, -0.1, f64::NAN] {
            h.fill(x);
        }
        assert_eq!(h.content(0), 1.0);
        assert_eq!(h.content(1), 2.0);
        assert_eq!(h.content(3), 1.0);
        assert_eq!(h.overflow(), 1.0);
        assert_eq!(h.underflow(), 1.0);
        assert_eq!(h.integral(), 4.0);
        assert_eq!(h.entries(), 6);
        assert_eq!(h.bin_center(2), 2.5);
    }

    #[test]
    fn test_normalize_scales_errors() {
        let mut h = Histogram::new(2, 0.0, 2.0).unwrap();
        for _ in 0..4 {
            h.fill(0.5);
        }
        assert!(h.normalize());
        assert_eq!(h.content(0), 1.0);
        // sqrt(4) / 4
        assert!((h.error(0) - 0.5).abs() < 1e-12);
        let mut empty = Histogram::new(2, 0.0, 2.0).unwrap();
        assert!(!empty.normalize());
    }

    #[test]
    fn test_invalid_binning() {
        assert!(Histogram::new(0, 0.0, 1.0).is_err());
        assert!(Histogram::new(5, 1.0, 1.0).is_err());
        assert!(Histogram::new(5, 0.0, f64::INFINITY).is_err());
    }
}
