//! Errors
//!
//! Custom error types used throughout the `calocalib` crate.
use thiserror::Error;

/// Errors that can occur while configuring, training, applying or
/// summarising a calibration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    /// A variable name was supplied twice at configuration time.
    #[error("Variable {0} is registered more than once.")]
    DuplicateVariable(String),
    /// A variable name was used that was never registered.
    #[error("Variable {0} is not registered.")]
    UnknownVariable(String),
    /// Any other invalid configuration, detected before processing starts.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// Invalid value parsing.
    #[error("Invalid value {0} passed for {1}, expected one of {2}.")]
    ParseString(String, String, String),
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// A selection expression could not be compiled.
    #[error("Unable to compile cut \"{0}\": {1}")]
    InvalidCut(String, String),
    /// The data source reported an invalid read size for an entry.
    #[error("Error in entry #{entry}: source reported {bytes} bytes read.")]
    SourceRead { entry: u64, bytes: i64 },
    /// A method's weights could not be located at application time.
    #[error("Weights for method {method} not found at {path}.")]
    MissingArtifact { method: String, path: String },
    /// A bin and output variable could not be fitted.
    #[error("Degenerate fit in bin {bin} for {key}: {reason}")]
    DegenerateFit { bin: String, key: String, reason: String },
    /// NaN or infinite values were left out of a bin.
    #[error("{count} non-finite values of {key} dropped in bin {bin}.")]
    NonFiniteValues { bin: String, key: String, count: usize },
    /// No events survived the training selection.
    #[error("No events available to train method {0}.")]
    EmptyTrainingSample(String),
    /// An operation was requested in the wrong phase.
    #[error("Method {0} is {1} and cannot become {2}.")]
    InvalidState(String, String, String),
    /// Unable to write an artifact.
    #[error("Unable to write artifact: {0}")]
    UnableToWrite(String),
    /// Unable to read an artifact.
    #[error("Unable to read artifact {0}")]
    UnableToRead(String),
}

impl CalibrationError {
    /// Whether the error only degrades processing instead of aborting it.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            CalibrationError::MissingArtifact { .. }
                | CalibrationError::DegenerateFit { .. }
                | CalibrationError::NonFiniteValues { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_source_read() {
        let err = CalibrationError::SourceRead { entry: 12, bytes: -1 };
        assert_eq!(err.to_string(), "Error in entry #12: source reported -1 bytes read.");
    }

    #[test]
    fn test_degradations() {
        let missing = CalibrationError::MissingArtifact {
            method: "LD".to_string(),
            path: "w/weights/run_LD.weights.xml".to_string(),
        };
        assert!(missing.is_degradation());
        assert!(missing.to_string().contains("run_LD.weights.xml"));
        assert!(!CalibrationError::UnknownVariable("ePar".to_string()).is_degradation());
        let cloned = missing.clone();
        assert_eq!(cloned, missing);
    }
}
