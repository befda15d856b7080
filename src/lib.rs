mod constants;

// Modules
pub mod artifact;
pub mod config;
pub mod cut;
pub mod data;
pub mod engine;
pub mod errors;
pub mod fit;
pub mod histogram;
pub mod method;
pub mod pipeline;
pub mod registry;
pub mod regressor;
pub mod resolution;
pub mod sampler;
pub mod source;
pub mod utils;

// Individual classes, and functions
pub use artifact::{weights_path, ArtifactStore, FileArtifactStore, MemoryArtifactStore};
pub use config::{CalibrationConfig, ConfigIO};
pub use data::Matrix;
pub use engine::{generate_outputs, EngineConfig, RegressionEngine, Use};
pub use errors::CalibrationError;
pub use pipeline::CalibrationPipeline;
pub use registry::VariableRegistry;
pub use resolution::{AnalyzerOptions, EnergyBin, Estimator, FitResult, Metric, ResolutionAnalyzer};
pub use source::{EventSource, MemorySource};
