//! Resolution
//!
//! Energy resolution and linearity of every calibrated output, per bin of
//! true energy. Values are collected per `(bin, key)` during the event loop
//! and reduced afterwards: a histogram is filled, a Gaussian is fitted to its
//! core, and the width is propagated through the ratio `sigma / mu`.
use crate::constants::{DEFAULT_HIST_BINS, DEFAULT_HIST_SPAN_RMS, DEFAULT_N_SIGMA_FIT};
use crate::errors::CalibrationError;
use crate::fit::{fit_gaussian, GaussianFit};
use crate::histogram::Histogram;
use crate::utils::{items_to_strings, mean_rms};
use hashbrown::{HashMap, HashSet};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A half open `[low, high)` interval of true energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyBin {
    pub tag: String,
    pub center: f64,
    pub low: f64,
    pub high: f64,
}

impl EnergyBin {
    pub fn new<S: Into<String>>(tag: S, center: f64, low: f64, high: f64) -> Self {
        EnergyBin {
            tag: tag.into(),
            center,
            low,
            high,
        }
    }

    #[inline]
    pub fn contains(&self, energy: f64) -> bool {
        energy >= self.low && energy < self.high
    }
}

/// Histogram range used before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Binning {
    /// `bins` bins spanning `mean ± span_rms * rms` of the sample.
    Auto { bins: usize, span_rms: f64 },
    Fixed { bins: usize, low: f64, high: f64 },
}

impl Default for Binning {
    fn default() -> Self {
        Binning::Auto {
            bins: DEFAULT_HIST_BINS,
            span_rms: DEFAULT_HIST_SPAN_RMS,
        }
    }
}

fn default_normalize() -> bool {
    true
}
fn default_n_sigma_fit() -> f64 {
    DEFAULT_N_SIGMA_FIT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOptions {
    /// Scale histograms to unit area before fitting.
    #[serde(default = "default_normalize")]
    pub normalize: bool,
    /// Half width of the fit window, in units of the sample rms.
    #[serde(default = "default_n_sigma_fit")]
    pub n_sigma_fit: f64,
    #[serde(default)]
    pub binning: Binning,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            normalize: default_normalize(),
            n_sigma_fit: default_n_sigma_fit(),
            binning: Binning::default(),
        }
    }
}

/// Peak position and width, and the resolution derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub mu: f64,
    pub sigma: f64,
    pub mu_err: f64,
    pub sigma_err: f64,
    pub resolution: f64,
    pub resolution_err: f64,
}

impl FitResult {
    pub fn from_parameters(mu: f64, sigma: f64, mu_err: f64, sigma_err: f64) -> Self {
        let (resolution, resolution_err) = if mu == 0.0 || sigma == 0.0 {
            (f64::NAN, f64::NAN)
        } else {
            let ratio = sigma / mu;
            let rel = ((sigma_err / sigma).powi(2) + (mu_err / mu).powi(2)).sqrt();
            (ratio, ratio * rel)
        };
        FitResult {
            mu,
            sigma,
            mu_err,
            sigma_err,
            resolution,
            resolution_err,
        }
    }

    /// Placeholder for a bin that could not be measured.
    pub fn sentinel() -> Self {
        FitResult {
            mu: f64::NAN,
            sigma: f64::NAN,
            mu_err: f64::NAN,
            sigma_err: f64::NAN,
            resolution: f64::NAN,
            resolution_err: f64::NAN,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.mu.is_nan() || self.resolution.is_nan()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// `sigma / mu` against the bin center.
    Resolution,
    /// `mu` against the bin center.
    Linearity,
}

impl FromStr for Metric {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Resolution" => Ok(Metric::Resolution),
            "Linearity" => Ok(Metric::Linearity),
            _ => Err(CalibrationError::ParseString(
                s.to_string(),
                "Metric".to_string(),
                items_to_strings(vec!["Resolution", "Linearity"]),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Estimator {
    FitBased,
    MomentBased,
}

impl FromStr for Estimator {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FitBased" | "Fit" => Ok(Estimator::FitBased),
            "MomentBased" | "Moments" => Ok(Estimator::MomentBased),
            _ => Err(CalibrationError::ParseString(
                s.to_string(),
                "Estimator".to_string(),
                items_to_strings(vec!["FitBased", "MomentBased"]),
            )),
        }
    }
}

/// `(bin center, value, error)`.
pub type Point = (f64, f64, f64);

#[derive(Debug, Clone)]
pub struct BinSummary {
    pub tag: String,
    pub center: f64,
    pub key: String,
    pub entries: usize,
    pub fit: FitResult,
    pub moments: FitResult,
    /// Full Gaussian fit, when it succeeded.
    pub gaussian: Option<GaussianFit>,
}

impl BinSummary {
    pub fn result(&self, estimator: Estimator) -> &FitResult {
        match estimator {
            Estimator::FitBased => &self.fit,
            Estimator::MomentBased => &self.moments,
        }
    }
}

/// Output of [`ResolutionAnalyzer::reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    keys: Vec<String>,
    /// Ordered by bin, then key.
    pub summaries: Vec<BinSummary>,
    pub diagnostics: Vec<CalibrationError>,
}

impl Reduction {
    pub fn get(&self, tag: &str, key: &str) -> Option<&BinSummary> {
        self.summaries.iter().find(|s| s.tag == tag && s.key == key)
    }

    /// Points of `key`, sorted by bin center. Unmeasured bins are left out.
    pub fn points(&self, key: &str, metric: Metric, estimator: Estimator) -> Vec<Point> {
        let mut points: Vec<Point> = self
            .summaries
            .iter()
            .filter(|s| s.key == key)
            .map(|s| (s.center, s.result(estimator)))
            .filter(|(_, r)| !r.is_sentinel())
            .map(|(center, r)| match metric {
                Metric::Resolution => (center, r.resolution, r.resolution_err),
                Metric::Linearity => (center, r.mu, r.mu_err),
            })
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points
    }

    /// Points of every key, in key order.
    pub fn point_sets(&self, metric: Metric, estimator: Estimator) -> Vec<(String, Vec<Point>)> {
        self.keys
            .iter()
            .map(|k| (k.clone(), self.points(k, metric, estimator)))
            .collect()
    }
}

pub struct ResolutionAnalyzer {
    bins: Vec<EnergyBin>,
    keys: Vec<String>,
    options: AnalyzerOptions,
    /// `samples[bin][key]`
    samples: Vec<Vec<Vec<f64>>>,
    /// Values dropped from `samples` because they were NaN or infinite.
    non_finite: Vec<Vec<usize>>,
}

impl ResolutionAnalyzer {
    pub fn new<S: Into<String>>(
        bins: Vec<EnergyBin>,
        keys: Vec<S>,
        options: AnalyzerOptions,
    ) -> Result<Self, CalibrationError> {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let mut seen: HashSet<String> = HashSet::new();
        for key in &keys {
            if !seen.insert(key.clone()) {
                return Err(CalibrationError::DuplicateVariable(key.clone()));
            }
        }
        let mut tags: HashSet<String> = HashSet::new();
        for bin in &bins {
            if !(bin.low < bin.high) {
                return Err(CalibrationError::InvalidParameter(
                    format!("energy bin {}", bin.tag),
                    "low < high".to_string(),
                    format!("[{}, {})", bin.low, bin.high),
                ));
            }
            if !tags.insert(bin.tag.clone()) {
                return Err(CalibrationError::Configuration(format!(
                    "energy bin {} is defined more than once",
                    bin.tag
                )));
            }
        }
        if !(options.n_sigma_fit > 0.0) {
            return Err(CalibrationError::InvalidParameter(
                "n_sigma_fit".to_string(),
                "a positive number".to_string(),
                options.n_sigma_fit.to_string(),
            ));
        }
        let samples = vec![vec![Vec::new(); keys.len()]; bins.len()];
        let non_finite = vec![vec![0; keys.len()]; bins.len()];
        Ok(ResolutionAnalyzer {
            bins,
            keys,
            options,
            samples,
            non_finite,
        })
    }

    pub fn bins(&self) -> &[EnergyBin] {
        &self.bins
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of non-finite values dropped for `(tag, key)`.
    pub fn dropped(&self, tag: &str, key: &str) -> usize {
        let b = self.bins.iter().position(|b| b.tag == tag);
        let k = self.keys.iter().position(|k| k == key);
        match (b, k) {
            (Some(b), Some(k)) => self.non_finite[b][k],
            _ => 0,
        }
    }

    /// Number of values collected for `(tag, key)`.
    pub fn entries(&self, tag: &str, key: &str) -> usize {
        let b = self.bins.iter().position(|b| b.tag == tag);
        let k = self.keys.iter().position(|k| k == key);
        match (b, k) {
            (Some(b), Some(k)) => self.samples[b][k].len(),
            _ => 0,
        }
    }

    /// Add one event. Every bin containing `true_energy` receives each
    /// requested key present in `values`.
    pub fn accumulate(&mut self, true_energy: f64, values: &HashMap<String, f64>) {
        for (b, bin) in self.bins.iter().enumerate() {
            if !bin.contains(true_energy) {
                continue;
            }
            for (k, key) in self.keys.iter().enumerate() {
                if let Some(v) = values.get(key) {
                    if v.is_finite() {
                        self.samples[b][k].push(*v);
                    } else {
                        self.non_finite[b][k] += 1;
                    }
                }
            }
        }
    }

    fn histogram(&self, values: &[f64], mean: f64, rms: f64) -> Result<Histogram, CalibrationError> {
        let mut hist = match self.options.binning {
            Binning::Auto { bins, span_rms } => Histogram::new(bins, mean - span_rms * rms, mean + span_rms * rms)?,
            Binning::Fixed { bins, low, high } => Histogram::new(bins, low, high)?,
        };
        values.iter().for_each(|v| hist.fill(*v));
        Ok(hist)
    }

    fn reduce_one(&self, bin: &EnergyBin, key: &str, values: &[f64]) -> Result<BinSummary, (BinSummary, String)> {
        let mut summary = BinSummary {
            tag: bin.tag.clone(),
            center: bin.center,
            key: key.to_string(),
            entries: values.len(),
            fit: FitResult::sentinel(),
            moments: FitResult::sentinel(),
            gaussian: None,
        };
        let (mean, rms) = match mean_rms(values) {
            Some(m) => m,
            None => return Err((summary, "no entries".to_string())),
        };
        if rms <= f64::EPSILON * mean.abs() {
            return Err((summary, "sample rms is zero".to_string()));
        }
        if mean == 0.0 {
            return Err((summary, "mean is zero".to_string()));
        }
        let n = values.len() as f64;
        summary.moments = FitResult::from_parameters(mean, rms, rms / n.sqrt(), rms / (2.0 * n).sqrt());

        let mut hist = match self.histogram(values, mean, rms) {
            Ok(h) => h,
            Err(e) => return Err((summary, e.to_string())),
        };
        if hist.integral() <= 0.0 {
            return Err((summary, "histogram integral is zero".to_string()));
        }
        if self.options.normalize {
            hist.normalize();
        }
        let k = self.options.n_sigma_fit;
        let fit = match fit_gaussian(&hist, mean - k * rms, mean + k * rms, (hist.integral(), mean, rms)) {
            Ok(f) => f,
            Err(e) => return Err((summary, e.to_string())),
        };
        if fit.mean == 0.0 {
            return Err((summary, "fitted mean is zero".to_string()));
        }
        summary.fit = FitResult::from_parameters(fit.mean, fit.sigma, fit.mean_err, fit.sigma_err);
        summary.gaussian = Some(fit);
        Ok(summary)
    }

    /// Fit every `(bin, key)`.
    ///
    /// Degenerate pairs are kept with sentinel results and reported in the
    /// diagnostics. Accumulated values are not modified.
    pub fn reduce(&self) -> Reduction {
        info!("Reducing {} bins for {} outputs.", self.bins.len(), self.keys.len());
        let mut summaries = Vec::with_capacity(self.bins.len() * self.keys.len());
        let mut diagnostics = Vec::new();
        for (b, bin) in self.bins.iter().enumerate() {
            for (k, key) in self.keys.iter().enumerate() {
                let dropped = self.non_finite[b][k];
                if dropped > 0 {
                    warn!("Bin {} of {} dropped {} non-finite values.", bin.tag, key, dropped);
                    diagnostics.push(CalibrationError::NonFiniteValues {
                        bin: bin.tag.clone(),
                        key: key.clone(),
                        count: dropped,
                    });
                }
                match self.reduce_one(bin, key, &self.samples[b][k]) {
                    Ok(summary) => summaries.push(summary),
                    Err((summary, reason)) => {
                        warn!("Bin {} of {} cannot be fitted: {}.", bin.tag, key, reason);
                        diagnostics.push(CalibrationError::DegenerateFit {
                            bin: bin.tag.clone(),
                            key: key.clone(),
                            reason,
                        });
                        summaries.push(summary);
                    }
                }
            }
        }
        Reduction {
            keys: self.keys.clone(),
            summaries,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn bins() -> Vec<EnergyBin> {
        vec![
            EnergyBin::new("Ene3", 3.0, 2.5, 3.5),
            EnergyBin::new("Ene2", 2.0, 1.5, 2.5),
        ]
    }

    fn event(key: &str, v: f64) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        values.insert(key.to_string(), v);
        values
    }

    #[test]
    fn test_resolution_error_propagation() {
        let r = FitResult::from_parameters(10.0, 2.0, 0.1, 0.05);
        assert!((r.resolution - 0.2).abs() < 1e-12);
        assert!((r.resolution_err - 0.00539).abs() < 1e-4);
        assert!(FitResult::from_parameters(0.0, 2.0, 0.1, 0.05).is_sentinel());
        assert!(FitResult::sentinel().is_sentinel());

        // the sign of sigma / mu carries over to its error
        let negative = FitResult::from_parameters(-10.0, 2.0, 0.1, 0.05);
        assert!((negative.resolution + 0.2).abs() < 1e-12);
        assert!((negative.resolution_err + 0.00539).abs() < 1e-4);
    }

    #[test]
    fn test_gaussian_bin() {
        let mut rng = StdRng::seed_from_u64(2);
        let normal = Normal::new(2.0, 0.3).unwrap();
        let mut analyzer = ResolutionAnalyzer::new(bins(), vec!["ePar_LD"], AnalyzerOptions::default()).unwrap();
        for _ in 0..1000 {
            analyzer.accumulate(2.0, &event("ePar_LD", normal.sample(&mut rng)));
        }
        let reduction = analyzer.reduce();
        let summary = reduction.get("Ene2", "ePar_LD").unwrap();
        assert_eq!(summary.entries, 1000);
        assert!((summary.fit.mu - 2.0).abs() < 0.05);
        assert!((summary.fit.sigma - 0.3).abs() < 0.05);
        assert!((summary.fit.resolution - 0.15).abs() < 0.03);
        assert!((summary.moments.mu - 2.0).abs() < 0.05);
        assert!((summary.moments.resolution - 0.15).abs() < 0.03);

        // the empty Ene3 bin is reported, not fatal
        assert!(reduction.get("Ene3", "ePar_LD").unwrap().fit.is_sentinel());
        assert_eq!(reduction.diagnostics.len(), 1);
        assert!(matches!(
            &reduction.diagnostics[0],
            CalibrationError::DegenerateFit { bin, .. } if bin == "Ene3"
        ));
        let points = reduction.points("ePar_LD", Metric::Resolution, Estimator::FitBased);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].0, 2.0);
        let linearity = reduction.points("ePar_LD", Metric::Linearity, Estimator::MomentBased);
        assert!((linearity[0].1 - 2.0).abs() < 0.05);

        let copy = reduction.clone();
        assert_eq!(copy.diagnostics, reduction.diagnostics);
        assert_eq!(copy.summaries.len(), 2);
    }

    #[test]
    fn test_points_sorted_and_overlapping_bins() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut bins = bins();
        bins.push(EnergyBin::new("Wide", 2.5, 1.5, 3.5));
        let mut analyzer = ResolutionAnalyzer::new(bins, vec!["E", "E_LD"], AnalyzerOptions::default()).unwrap();
        for &(energy, scale) in &[(2.0, 0.3), (3.0, 0.4)] {
            let normal = Normal::new(energy, scale).unwrap();
            for _ in 0..800 {
                analyzer.accumulate(energy, &event("E_LD", normal.sample(&mut rng)));
            }
        }
        assert_eq!(analyzer.entries("Wide", "E_LD"), 1600);
        assert_eq!(analyzer.entries("Ene3", "E_LD"), 800);
        assert_eq!(analyzer.entries("Ene2", "E"), 0);
        let reduction = analyzer.reduce();
        let points = reduction.points("E_LD", Metric::Linearity, Estimator::MomentBased);
        let centers: Vec<f64> = points.iter().map(|p| p.0).collect();
        assert_eq!(centers, vec![2.0, 2.5, 3.0]);
        let sets = reduction.point_sets(Metric::Resolution, Estimator::MomentBased);
        assert_eq!(sets[0].0, "E");
        assert!(sets[0].1.is_empty());
        assert_eq!(sets[1].1.len(), 3);
    }

    #[test]
    fn test_reduce_is_repeatable() {
        let mut rng = StdRng::seed_from_u64(9);
        let normal = Normal::new(3.0, 0.5).unwrap();
        let mut analyzer = ResolutionAnalyzer::new(bins(), vec!["E"], AnalyzerOptions::default()).unwrap();
        for _ in 0..500 {
            analyzer.accumulate(3.1, &event("E", normal.sample(&mut rng)));
        }
        analyzer.accumulate(3.1, &event("E", f64::NAN));
        let first = format!("{:?}", analyzer.reduce());
        let second = format!("{:?}", analyzer.reduce());
        assert_eq!(first, second);
    }

    #[test]
    fn test_non_finite_values_are_reported() {
        let mut rng = StdRng::seed_from_u64(13);
        let normal = Normal::new(2.0, 0.2).unwrap();
        let mut analyzer = ResolutionAnalyzer::new(bins(), vec!["E"], AnalyzerOptions::default()).unwrap();
        for _ in 0..400 {
            analyzer.accumulate(2.0, &event("E", normal.sample(&mut rng)));
        }
        analyzer.accumulate(2.0, &event("E", f64::NAN));
        analyzer.accumulate(2.0, &event("E", f64::INFINITY));
        assert_eq!(analyzer.entries("Ene2", "E"), 400);
        assert_eq!(analyzer.dropped("Ene2", "E"), 2);

        let reduction = analyzer.reduce();
        assert!(!reduction.get("Ene2", "E").unwrap().fit.is_sentinel());
        let dropped: Vec<&CalibrationError> = reduction
            .diagnostics
            .iter()
            .filter(|d| matches!(d, CalibrationError::NonFiniteValues { .. }))
            .collect();
        assert_eq!(dropped.len(), 1);
        assert!(matches!(
            dropped[0],
            CalibrationError::NonFiniteValues { bin, count: 2, .. } if bin == "Ene2"
        ));
        assert!(dropped[0].is_degradation());
    }

    #[test]
    fn test_degenerate_samples() {
        let mut analyzer = ResolutionAnalyzer::new(bins(), vec!["E"], AnalyzerOptions::default()).unwrap();
        for _ in 0..20 {
            analyzer.accumulate(2.0, &event("E", 2.0));
        }
        let reduction = analyzer.reduce();
        let summary = reduction.get("Ene2", "E").unwrap();
        assert!(summary.fit.is_sentinel());
        assert!(summary.moments.is_sentinel());
        assert_eq!(reduction.diagnostics.len(), 2);
        assert!(reduction.diagnostics.iter().all(|d| d.is_degradation()));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            ResolutionAnalyzer::new(bins(), vec!["E", "E"], AnalyzerOptions::default()),
            Err(CalibrationError::DuplicateVariable(k)) if k == "E"
        ));
        let mut repeated = bins();
        repeated.push(EnergyBin::new("Ene2", 2.0, 1.0, 3.0));
        assert!(matches!(
            ResolutionAnalyzer::new(repeated, vec!["E"], AnalyzerOptions::default()),
            Err(CalibrationError::Configuration(_))
        ));
        let bad = vec![EnergyBin::new("Ene2", 2.0, 2.5, 1.5)];
        assert!(ResolutionAnalyzer::new(bad, vec!["E"], AnalyzerOptions::default()).is_err());
        assert_eq!(Metric::from_str("Linearity").unwrap(), Metric::Linearity);
        assert!(Estimator::from_str("Median").is_err());
    }
}
