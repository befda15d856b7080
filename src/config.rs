//! Configuration
//!
//! A complete calibration run described as one serialisable value.
use crate::engine::EngineConfig;
use crate::errors::CalibrationError;
use crate::resolution::{AnalyzerOptions, EnergyBin};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_bins() -> Vec<EnergyBin> {
    let centers = [2., 3., 4., 5., 6., 8., 10., 12., 16., 20.];
    let low = [1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 9.5, 11.5, 13.5, 18.5];
    let high = [2.5, 3.5, 4.5, 5.5, 6.5, 9.5, 11.5, 13.5, 18.5, 21.5];
    centers
        .iter()
        .zip(low.iter().zip(high.iter()))
        .map(|(c, (l, h))| EnergyBin::new(format!("Ene{}", c), *c, *l, *h))
        .collect()
}

fn default_true_energy() -> String {
    "ePar".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub engine: EngineConfig,
    /// Bins of true energy.
    #[serde(default = "default_bins")]
    pub bins: Vec<EnergyBin>,
    /// Outputs to summarise. Empty means every engine output.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub analysis: AnalyzerOptions,
    /// Registered variable holding the true particle energy.
    #[serde(default = "default_true_energy")]
    pub true_energy: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            engine: EngineConfig::default(),
            bins: default_bins(),
            keys: Vec::new(),
            analysis: AnalyzerOptions::default(),
            true_energy: default_true_energy(),
        }
    }
}

impl CalibrationConfig {
    pub fn new(engine: EngineConfig) -> Self {
        CalibrationConfig {
            engine,
            ..Default::default()
        }
    }
}

pub trait ConfigIO: Serialize + DeserializeOwned + Sized {
    /// Save a configuration as a json object to a file.
    ///
    /// * `path` - Path to save the configuration.
    fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<(), CalibrationError> {
        fs::write(path, self.json_dump()?).map_err(|e| CalibrationError::UnableToWrite(e.to_string()))
    }

    /// Dump a configuration as a json object
    fn json_dump(&self) -> Result<String, CalibrationError> {
        serde_json::to_string(self).map_err(|e| CalibrationError::UnableToWrite(e.to_string()))
    }

    /// Load a configuration from Json string
    ///
    /// * `json_str` - String object, which can be serialized to json.
    fn from_json(json_str: &str) -> Result<Self, CalibrationError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| CalibrationError::UnableToRead(e.to_string()))
    }

    /// Load a configuration from a path to a json object.
    ///
    /// * `path` - Path to load the configuration from.
    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self, CalibrationError> {
        let json_str = fs::read_to_string(path).map_err(|e| CalibrationError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl ConfigIO for CalibrationConfig {}
impl ConfigIO for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{SampleSize, SplitMode};
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CalibrationConfig::default();
        assert_eq!(config.bins.len(), 10);
        assert_eq!(config.bins[0].tag, "Ene2");
        assert_eq!(config.bins[5], EnergyBin::new("Ene8", 8.0, 6.5, 9.5));
        assert_eq!(config.engine.methods.len(), 4);
        assert_eq!(config.engine.run_name, "TMVARegression");
        assert!(config.analysis.normalize);
        assert_eq!(config.analysis.n_sigma_fit, 2.0);
    }

    #[test]
    fn test_minimal_json() {
        let json = r#"{
            "engine": {
                "variables": [["Target", "ePar"], ["Train", "eLeadBHCal"], ["Train", "eLeadBEMC"]],
                "methods": [["LD", "!H:!V"]],
                "training_cut": "(eLeadBHCal>=0)&&(eLeadBEMC>=0)",
                "split": {"train": {"Count": 100}, "mode": "Sequential"}
            },
            "keys": ["ePar_LD"]
        }"#;
        let config = CalibrationConfig::from_json(json).unwrap();
        assert_eq!(config.engine.variables.len(), 3);
        assert_eq!(config.engine.split.train, SampleSize::Count(100));
        assert_eq!(config.engine.split.test, SampleSize::Remaining);
        assert_eq!(config.engine.split.mode, SplitMode::Sequential);
        assert_eq!(config.engine.application_cut, "");
        assert_eq!(config.true_energy, "ePar");
        assert_eq!(config.bins.len(), 10);
        assert!(CalibrationConfig::from_json("{\"keys\": []}").is_err());
    }

    #[test]
    fn test_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut config = CalibrationConfig::default();
        config.engine.seed = 11;
        config.keys = vec!["ePar_BDTG".to_string()];
        config.save_config(&path).unwrap();
        let loaded = CalibrationConfig::load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
