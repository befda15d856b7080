pub const WEIGHTS_DIR: &str = "weights";
pub const WEIGHTS_SUFFIX: &str = ".weights.xml";
pub const SCHEMA_SEPARATOR: char = ':';
pub const OUTPUT_SEPARATOR: &str = "_";

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;
pub const DEFAULT_SEED: u64 = 0;

// Resolution extraction
pub const DEFAULT_N_SIGMA_FIT: f64 = 2.0;
pub const DEFAULT_HIST_BINS: usize = 50;
pub const DEFAULT_HIST_SPAN_RMS: f64 = 5.0;
pub const FIT_ITERATION_LIMIT: usize = 200;
pub const FIT_TOLERANCE: f64 = 1e-10;
pub const FIT_LAMBDA_INIT: f64 = 1e-3;
pub const FIT_MIN_POINTS: usize = 4;

// Built-in regressor defaults
pub const KNN_DEFAULT_NEIGHBOURS: usize = 20;
pub const KNN_DEFAULT_SCALE_FRAC: f64 = 0.8;
pub const KNN_DEFAULT_SIGMA_FACT: f64 = 1.0;
pub const MLP_DEFAULT_CYCLES: usize = 500;
pub const MLP_DEFAULT_LEARNING_RATE: f64 = 0.02;
pub const MLP_DEFAULT_HIDDEN: &str = "N,N-1";
pub const BDT_DEFAULT_TREES: usize = 200;
pub const BDT_DEFAULT_SHRINKAGE: f64 = 0.1;
pub const BDT_DEFAULT_MAX_DEPTH: usize = 3;
pub const BDT_DEFAULT_CUTS: usize = 20;
pub const BDT_DEFAULT_MIN_NODE_SIZE: f64 = 2.5;
pub const BDT_DEFAULT_BAGGED_FRACTION: f64 = 0.6;
pub const HESSIAN_EPS: f64 = 1e-12;
