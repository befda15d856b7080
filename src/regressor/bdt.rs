//! Gradient boosted regression trees.
//!
//! Squared loss, so every row carries gradient `prediction - target` and
//! unit hessian. Candidate splits sit on a uniform grid of `nCuts` values per
//! feature; rows are mapped to grid bins once, before boosting starts.
use crate::constants::{
    BDT_DEFAULT_BAGGED_FRACTION, BDT_DEFAULT_CUTS, BDT_DEFAULT_MAX_DEPTH, BDT_DEFAULT_MIN_NODE_SIZE,
    BDT_DEFAULT_SHRINKAGE, BDT_DEFAULT_TREES,
};
use crate::data::Matrix;
use crate::errors::CalibrationError;
use crate::method::MethodOptions;
use crate::regressor::Regressor;
use crate::sampler::{RandomSampler, Sampler};
use crate::utils::{gain, validate_float_parameter, weight};
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BdtParams {
    pub n_trees: usize,
    pub shrinkage: f64,
    pub max_depth: usize,
    pub n_cuts: usize,
    /// Minimum node size, in percent of the training sample.
    pub min_node_size: f64,
    pub bagged: bool,
    pub bagged_fraction: f64,
}

impl Default for BdtParams {
    fn default() -> Self {
        BdtParams {
            n_trees: BDT_DEFAULT_TREES,
            shrinkage: BDT_DEFAULT_SHRINKAGE,
            max_depth: BDT_DEFAULT_MAX_DEPTH,
            n_cuts: BDT_DEFAULT_CUTS,
            min_node_size: BDT_DEFAULT_MIN_NODE_SIZE,
            bagged: false,
            bagged_fraction: BDT_DEFAULT_BAGGED_FRACTION,
        }
    }
}

impl BdtParams {
    pub fn from_options(options: &MethodOptions) -> Result<Self, CalibrationError> {
        let min_node_size = match options.get_str("MinNodeSize") {
            None => BDT_DEFAULT_MIN_NODE_SIZE,
            Some(v) => v.trim_end_matches('%').trim().parse::<f64>().map_err(|_| {
                CalibrationError::InvalidParameter(
                    "MinNodeSize".to_string(),
                    "a percentage such as 2.5%".to_string(),
                    v.to_string(),
                )
            })?,
        };
        let params = BdtParams {
            n_trees: options.get_usize("NTrees", BDT_DEFAULT_TREES)?,
            shrinkage: options.get_f64("Shrinkage", BDT_DEFAULT_SHRINKAGE)?,
            max_depth: options.get_usize("MaxDepth", BDT_DEFAULT_MAX_DEPTH)?,
            n_cuts: options.get_usize("nCuts", BDT_DEFAULT_CUTS)?,
            min_node_size,
            bagged: options.flag("UseBaggedBoost", false)?,
            bagged_fraction: options.get_f64("BaggedSampleFraction", BDT_DEFAULT_BAGGED_FRACTION)?,
        };
        validate_float_parameter(params.shrinkage, f64::MIN_POSITIVE, 1.0, "Shrinkage")?;
        validate_float_parameter(params.min_node_size, 0.0, 50.0, "MinNodeSize")?;
        validate_float_parameter(params.bagged_fraction, f64::MIN_POSITIVE, 1.0, "BaggedSampleFraction")?;
        if params.n_cuts == 0 {
            return Err(CalibrationError::InvalidParameter(
                "nCuts".to_string(),
                "at least one cut".to_string(),
                "0".to_string(),
            ));
        }
        Ok(params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
    },
    /// Rows with `x[feature] < threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if features.get(*feature).map_or(false, |v| v < threshold) {
                        *left
                    } else {
                        *right
                    };
                }
                None => return 0.0,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BdtModel {
    pub base_score: f64,
    pub trees: Vec<RegressionTree>,
}

/// Grid cut values and the bin of every row, per feature.
struct BinnedData {
    cuts: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedData {
    fn new(data: &Matrix<f64>, n_cuts: usize) -> Self {
        let mut cuts = Vec::with_capacity(data.cols);
        let mut bins = Vec::with_capacity(data.cols);
        for j in 0..data.cols {
            let col = data.get_col(j);
            let (lo, hi) = col
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
            let feature_cuts: Vec<f64> = if hi > lo {
                (1..=n_cuts)
                    .map(|k| lo + (hi - lo) * k as f64 / (n_cuts + 1) as f64)
                    .collect()
            } else {
                Vec::new()
            };
            // bin b holds values in [cut[b-1], cut[b])
            let feature_bins = col
                .iter()
                .map(|v| feature_cuts.partition_point(|c| c <= v) as u16)
                .collect();
            cuts.push(feature_cuts);
            bins.push(feature_bins);
        }
        BinnedData { cuts, bins }
    }
}

struct Grower<'a> {
    binned: &'a BinnedData,
    gradients: &'a [f64],
    max_depth: usize,
    min_rows: usize,
    shrinkage: f64,
    nodes: Vec<TreeNode>,
}

impl<'a> Grower<'a> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let g: f64 = rows.iter().map(|&r| self.gradients[r]).sum();
        let h = rows.len() as f64;
        self.nodes.push(TreeNode::Leaf {
            value: self.shrinkage * weight(g, h),
        });
        if depth >= self.max_depth || rows.len() < 2 * self.min_rows {
            return idx;
        }
        let parent_gain = gain(g, h);
        let mut best: Option<(f64, usize, usize)> = None;
        for (feature, feature_cuts) in self.binned.cuts.iter().enumerate() {
            if feature_cuts.is_empty() {
                continue;
            }
            let mut grad_hist = vec![0.0; feature_cuts.len() + 1];
            let mut count_hist = vec![0usize; feature_cuts.len() + 1];
            for &r in &rows {
                let b = self.binned.bins[feature][r] as usize;
                grad_hist[b] += self.gradients[r];
                count_hist[b] += 1;
            }
            let (mut gl, mut nl) = (0.0, 0usize);
            for cut in 0..feature_cuts.len() {
                gl += grad_hist[cut];
                nl += count_hist[cut];
                let nr = rows.len() - nl;
                if nl < self.min_rows || nr < self.min_rows {
                    continue;
                }
                let split_gain = gain(gl, nl as f64) + gain(g - gl, nr as f64) - parent_gain;
                if split_gain > 0.0 && best.map_or(true, |(bg, _, _)| split_gain > bg) {
                    best = Some((split_gain, feature, cut));
                }
            }
        }
        let (_, feature, cut) = match best {
            Some(b) => b,
            None => return idx,
        };
        let feature_bins = &self.binned.bins[feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| (feature_bins[r] as usize) <= cut);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = TreeNode::Split {
            feature,
            threshold: self.binned.cuts[feature][cut],
            left,
            right,
        };
        idx
    }
}

impl BdtModel {
    pub fn fit(params: &BdtParams, data: &Matrix<f64>, y: &[f64], seed: u64) -> Result<Self, CalibrationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let binned = BinnedData::new(data, params.n_cuts);
        let n = data.rows;
        let min_rows = ((params.min_node_size / 100.0 * n as f64).ceil() as usize).max(1);
        let base_score = y.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_score; n];
        let index: Vec<usize> = (0..n).collect();
        let mut sampler = RandomSampler::new(params.bagged_fraction);
        let mut trees = Vec::with_capacity(params.n_trees);

        for t in 0..params.n_trees {
            let gradients: Vec<f64> = predictions.iter().zip(y.iter()).map(|(p, y)| p - y).collect();
            let rows = if params.bagged {
                let (chosen, _) = sampler.sample(&mut rng, &index);
                if chosen.is_empty() {
                    index.clone()
                } else {
                    chosen
                }
            } else {
                index.clone()
            };
            let mut grower = Grower {
                binned: &binned,
                gradients: &gradients,
                max_depth: params.max_depth,
                min_rows,
                shrinkage: params.shrinkage,
                nodes: Vec::new(),
            };
            grower.grow(rows, 0);
            let tree = RegressionTree { nodes: grower.nodes };
            for (i, p) in predictions.iter_mut().enumerate() {
                *p += tree.predict(&data.get_row(i));
            }
            if t % 50 == 0 {
                debug!("Tree {} has {} nodes.", t, tree.nodes.len());
            }
            trees.push(tree);
        }
        Ok(BdtModel { base_score, trees })
    }
}

impl Regressor for BdtModel {
    fn predict(&self, features: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(features)).sum::<f64>()
    }
}
