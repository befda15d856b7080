//! Sampler
//!
//! Splitting of the selected events into training and test samples, and
//! random subsampling of rows before fitting new trees.
use crate::constants::DEFAULT_SEED;
use crate::errors::CalibrationError;
use crate::utils::items_to_strings;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How many events go to one side of the split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleSize {
    /// Whatever the other side leaves over (half of all events if both sides
    /// are unspecified).
    Remaining,
    Count(usize),
    Fraction(f64),
}

impl Default for SampleSize {
    fn default() -> Self {
        SampleSize::Remaining
    }
}

impl SampleSize {
    fn resolve(&self, n: usize, name: &str) -> Result<Option<usize>, CalibrationError> {
        match self {
            SampleSize::Remaining => Ok(None),
            SampleSize::Count(c) => Ok(Some(*c)),
            SampleSize::Fraction(f) => {
                if !(0.0..=1.0).contains(f) {
                    return Err(CalibrationError::InvalidParameter(
                        name.to_string(),
                        "a fraction between 0 and 1".to_string(),
                        f.to_string(),
                    ));
                }
                Ok(Some((f * n as f64).round() as usize))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    Random,
    /// The first events train, the following ones test.
    Sequential,
    /// Events alternate between training and test.
    Alternate,
}

impl FromStr for SplitMode {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Random" => Ok(SplitMode::Random),
            "Sequential" | "Block" => Ok(SplitMode::Sequential),
            "Alternate" => Ok(SplitMode::Alternate),
            _ => Err(CalibrationError::ParseString(
                s.to_string(),
                "SplitMode".to_string(),
                items_to_strings(vec!["Random", "Sequential", "Alternate"]),
            )),
        }
    }
}

const FRACTION_TOLERANCE: f64 = 1e-9;

fn default_split_mode() -> SplitMode {
    SplitMode::Random
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// Train/test split of the events that pass the training selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPolicy {
    #[serde(default)]
    pub train: SampleSize,
    #[serde(default)]
    pub test: SampleSize,
    #[serde(default = "default_split_mode")]
    pub mode: SplitMode,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy {
            train: SampleSize::Remaining,
            test: SampleSize::Remaining,
            mode: default_split_mode(),
            seed: default_seed(),
        }
    }
}

impl SplitPolicy {
    /// Split `n` events, returning `(train, test)` event indices.
    ///
    /// Requesting more events than are available is an error.
    pub fn split(&self, n: usize) -> Result<(Vec<usize>, Vec<usize>), CalibrationError> {
        let (n_train, n_test) = match (self.train.resolve(n, "train")?, self.test.resolve(n, "test")?) {
            (None, None) => {
                let half = n - n / 2;
                (half, n - half)
            }
            (Some(a), None) => (a, n.saturating_sub(a)),
            (None, Some(b)) => (n.saturating_sub(b), b),
            (Some(a), Some(b)) => match (self.train, self.test) {
                // rounding both fractions may overshoot by one event
                (SampleSize::Fraction(ft), SampleSize::Fraction(fs)) => {
                    if ft + fs > 1.0 + FRACTION_TOLERANCE {
                        return Err(CalibrationError::Configuration(format!(
                            "training fraction {} and test fraction {} exceed 1",
                            ft, fs
                        )));
                    }
                    (a, b.min(n - a.min(n)))
                }
                _ => (a, b),
            },
        };
        if n_train + n_test > n {
            return Err(CalibrationError::Configuration(format!(
                "{} training and {} test events requested, only {} available",
                n_train, n_test, n
            )));
        }
        let take = |order: Vec<usize>| (order[..n_train].to_vec(), order[n_train..n_train + n_test].to_vec());
        let (mut train, mut test) = match self.mode {
            SplitMode::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed);
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(&mut rng);
                take(order)
            }
            SplitMode::Sequential => take((0..n).collect()),
            SplitMode::Alternate => {
                // even positions train while both sides still need events
                let mut train = Vec::with_capacity(n_train);
                let mut test = Vec::with_capacity(n_test);
                for i in 0..n {
                    let want_train = train.len() < n_train;
                    let want_test = test.len() < n_test;
                    match (want_train, want_test) {
                        (true, true) if i % 2 == 0 => train.push(i),
                        (true, true) => test.push(i),
                        (true, false) => train.push(i),
                        (false, true) => test.push(i),
                        (false, false) => break,
                    }
                }
                (train, test)
            }
        };
        train.sort_unstable();
        test.sort_unstable();
        Ok((train, test))
    }
}

// A sampler can be used to subset the data prior to fitting a new tree.
pub trait Sampler {
    /// Sample the data, returning a tuple, where the first item is the samples
    /// chosen for training, and the second are the samples excluded.
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>);
}

pub struct RandomSampler {
    subsample: f64,
}

impl RandomSampler {
    pub fn new(subsample: f64) -> Self {
        RandomSampler { subsample }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let subsample = self.subsample;
        let mut chosen = Vec::new();
        let mut excluded = Vec::new();
        for i in index {
            if rng.gen::<f64>() < subsample {
                chosen.push(*i);
            } else {
                excluded.push(*i)
            }
        }
        (chosen, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sampler() {
        let mut rng = StdRng::seed_from_u64(42);
        let index = vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let mut sampler = RandomSampler::new(0.5);
        let (chosen, excluded) = sampler.sample(&mut rng, &index);
        assert_eq!(chosen.len() + excluded.len(), index.len());

        // Test with subsample 1.0 (all should be chosen)
        let mut sampler_all = RandomSampler::new(1.0);
        let (chosen_all, excluded_all) = sampler_all.sample(&mut rng, &index);
        assert_eq!(chosen_all.len(), index.len());
        assert!(excluded_all.is_empty());

        // Test with subsample 0.0 (none should be chosen)
        let mut sampler_none = RandomSampler::new(0.0);
        let (chosen_none, excluded_none) = sampler_none.sample(&mut rng, &index);
        assert!(chosen_none.is_empty());
        assert_eq!(excluded_none.len(), index.len());
    }

    #[test]
    fn test_split_counts() {
        let policy = SplitPolicy {
            train: SampleSize::Count(100),
            test: SampleSize::Count(0),
            ..Default::default()
        };
        let (train, test) = policy.split(250).unwrap();
        assert_eq!(train.len(), 100);
        assert!(test.is_empty());

        let (train, test) = SplitPolicy::default().split(11).unwrap();
        assert_eq!((train.len(), test.len()), (6, 5));
        assert!(train.iter().all(|i| !test.contains(i)));

        let fraction = SplitPolicy {
            train: SampleSize::Fraction(0.8),
            ..Default::default()
        };
        let (train, test) = fraction.split(10).unwrap();
        assert_eq!((train.len(), test.len()), (8, 2));
    }

    #[test]
    fn test_split_modes() {
        let sequential = SplitPolicy {
            train: SampleSize::Count(3),
            mode: SplitMode::Sequential,
            ..Default::default()
        };
        assert_eq!(sequential.split(5).unwrap(), (vec![0, 1, 2], vec![3, 4]));
        let alternate = SplitPolicy {
            mode: SplitMode::Alternate,
            ..Default::default()
        };
        assert_eq!(alternate.split(6).unwrap(), (vec![0, 2, 4], vec![1, 3, 5]));
        let random = SplitPolicy {
            seed: 9,
            ..Default::default()
        };
        assert_eq!(random.split(40).unwrap(), random.split(40).unwrap());
        assert_eq!(SplitMode::from_str("Block").unwrap(), SplitMode::Sequential);
    }

    #[test]
    fn test_split_fractions_summing_to_one() {
        let policy = |train: f64, test: f64| SplitPolicy {
            train: SampleSize::Fraction(train),
            test: SampleSize::Fraction(test),
            ..Default::default()
        };
        for &(ft, fs, n, expected) in &[
            (0.5, 0.5, 3, (2, 1)),
            (0.5, 0.5, 101, (51, 50)),
            (0.7, 0.3, 5, (4, 1)),
            (0.5, 0.5, 10, (5, 5)),
        ] {
            let (train, test) = policy(ft, fs).split(n).unwrap();
            assert_eq!((train.len(), test.len()), expected);
            assert!(train.iter().all(|i| !test.contains(i)));
        }
        let (train, test) = policy(0.4, 0.4).split(10).unwrap();
        assert_eq!((train.len(), test.len()), (4, 4));
        assert!(matches!(
            policy(0.6, 0.6).split(10),
            Err(CalibrationError::Configuration(_))
        ));
    }

    #[test]
    fn test_split_oversubscribed() {
        let policy = SplitPolicy {
            train: SampleSize::Count(8),
            test: SampleSize::Count(8),
            ..Default::default()
        };
        assert!(matches!(policy.split(10), Err(CalibrationError::Configuration(_))));
        let bad = SplitPolicy {
            train: SampleSize::Fraction(1.5),
            ..Default::default()
        };
        assert!(bad.split(10).is_err());
    }
}
