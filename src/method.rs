//! Methods
//!
//! The catalog of regression methods, their option strings and the
//! per-method lifecycle.
use crate::errors::CalibrationError;
use crate::regressor::{RegressorConfig, TrainedModel};
use crate::utils::items_to_strings;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of regression method known to the engine.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Linear discriminant, i.e. linear least squares.
    LD,
    /// k-nearest neighbours.
    KNN,
    /// Multilayer perceptron.
    MLP,
    /// Gradient boosted decision trees.
    BDTG,
}

impl FromStr for MethodKind {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LD" => Ok(MethodKind::LD),
            "KNN" => Ok(MethodKind::KNN),
            "MLP" => Ok(MethodKind::MLP),
            "BDTG" => Ok(MethodKind::BDTG),
            _ => Err(CalibrationError::ParseString(
                s.to_string(),
                "MethodKind".to_string(),
                items_to_strings(vec!["LD", "KNN", "MLP", "BDTG"]),
            )),
        }
    }
}

impl MethodKind {
    /// Resolve a method name to its kind.
    ///
    /// The full name is tried first, then the prefix before the first `_`,
    /// so that `BDTG_deep` and `BDTG` both resolve to [`MethodKind::BDTG`].
    pub fn lookup(name: &str) -> Result<Self, CalibrationError> {
        if let Ok(kind) = MethodKind::from_str(name) {
            return Ok(kind);
        }
        match name.split_once('_') {
            Some((prefix, _)) => MethodKind::from_str(prefix).map_err(|_| {
                CalibrationError::ParseString(
                    name.to_string(),
                    "MethodKind".to_string(),
                    items_to_strings(vec!["LD", "KNN", "MLP", "BDTG"]),
                )
            }),
            None => MethodKind::from_str(name),
        }
    }

    /// Option keys the built-in regressor for this kind reads.
    pub fn recognised_options(&self) -> &'static [&'static str] {
        match self {
            MethodKind::LD => &[],
            MethodKind::KNN => &["nkNN", "ScaleFrac", "UseKernel", "SigmaFact"],
            MethodKind::MLP => &["HiddenLayers", "NeuronType", "NCycles", "LearningRate"],
            MethodKind::BDTG => &[
                "NTrees",
                "Shrinkage",
                "MaxDepth",
                "nCuts",
                "MinNodeSize",
                "UseBaggedBoost",
                "BaggedSampleFraction",
            ],
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodKind::LD => "LD",
            MethodKind::KNN => "KNN",
            MethodKind::MLP => "MLP",
            MethodKind::BDTG => "BDTG",
        };
        f.write_str(s)
    }
}

// Verbosity and help flags carry no meaning here.
const SILENT_FLAGS: [&str; 4] = ["H", "V", "Silent", "Color"];

/// One token of a colon separated option string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionToken {
    /// `Name` or `!Name`.
    Flag { name: String, enabled: bool },
    /// `key=value`.
    Value { key: String, value: String },
}

impl OptionToken {
    fn key(&self) -> &str {
        match self {
            OptionToken::Flag { name, .. } => name,
            OptionToken::Value { key, .. } => key,
        }
    }
}

/// Ordered option tokens, e.g. `!H:!V:NTrees=200:UseBaggedBoost`.
///
/// When a key is repeated the last occurrence wins.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodOptions {
    raw: String,
    tokens: Vec<OptionToken>,
}

impl MethodOptions {
    pub fn parse(raw: &str) -> Result<Self, CalibrationError> {
        let mut tokens = Vec::new();
        for token in raw.split(':').map(str::trim).filter(|t| !t.is_empty()) {
            match token.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    let value = value.trim();
                    if key.is_empty() || value.is_empty() || key.contains('!') {
                        return Err(CalibrationError::Configuration(format!(
                            "malformed option \"{}\" in \"{}\"",
                            token, raw
                        )));
                    }
                    tokens.push(OptionToken::Value {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                None => {
                    let (name, enabled) = match token.strip_prefix('!') {
                        Some(n) => (n.trim(), false),
                        None => (token, true),
                    };
                    if name.is_empty() || name.contains('!') {
                        return Err(CalibrationError::Configuration(format!(
                            "malformed option \"{}\" in \"{}\"",
                            token, raw
                        )));
                    }
                    tokens.push(OptionToken::Flag {
                        name: name.to_string(),
                        enabled,
                    });
                }
            }
        }
        Ok(MethodOptions {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn tokens(&self) -> &[OptionToken] {
        &self.tokens
    }

    fn last(&self, key: &str) -> Option<&OptionToken> {
        self.tokens.iter().rev().find(|t| t.key() == key)
    }

    /// Raw value of `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.last(key) {
            Some(OptionToken::Value { value, .. }) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, CalibrationError> {
        match self.get_str(key) {
            None => Ok(default),
            Some(v) => v.parse::<f64>().map_err(|_| {
                CalibrationError::InvalidParameter(key.to_string(), "a real number".to_string(), v.to_string())
            }),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, CalibrationError> {
        match self.get_str(key) {
            None => Ok(default),
            Some(v) => v.parse::<usize>().map_err(|_| {
                CalibrationError::InvalidParameter(
                    key.to_string(),
                    "a non-negative integer".to_string(),
                    v.to_string(),
                )
            }),
        }
    }

    /// Boolean option, given either as a flag (`Name`, `!Name`) or as
    /// `Name=T|F|True|False`.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, CalibrationError> {
        match self.last(key) {
            None => Ok(default),
            Some(OptionToken::Flag { enabled, .. }) => Ok(*enabled),
            Some(OptionToken::Value { value, .. }) => match value.as_str() {
                "T" | "True" | "true" | "1" => Ok(true),
                "F" | "False" | "false" | "0" => Ok(false),
                v => Err(CalibrationError::InvalidParameter(
                    key.to_string(),
                    "T or F".to_string(),
                    v.to_string(),
                )),
            },
        }
    }

    /// Keys that are neither read by `kind` nor silent flags.
    pub fn unrecognised(&self, kind: MethodKind) -> Vec<&str> {
        let known = kind.recognised_options();
        let mut out: Vec<&str> = Vec::new();
        for t in &self.tokens {
            let key = t.key();
            if !known.contains(&key) && !SILENT_FLAGS.contains(&key) && !out.contains(&key) {
                out.push(key);
            }
        }
        out
    }
}

/// Lifecycle of a method. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodState {
    Configured,
    Trained,
    Applied,
    Unavailable,
}

impl MethodState {
    fn rank(&self) -> u8 {
        match self {
            MethodState::Configured => 0,
            MethodState::Trained => 1,
            MethodState::Applied | MethodState::Unavailable => 2,
        }
    }
}

impl fmt::Display for MethodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MethodState::Configured => "Configured",
            MethodState::Trained => "Trained",
            MethodState::Applied => "Applied",
            MethodState::Unavailable => "Unavailable",
        };
        f.write_str(s)
    }
}

/// A named regression method.
#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub kind: MethodKind,
    pub options: MethodOptions,
    pub config: RegressorConfig,
    state: MethodState,
    model: Option<TrainedModel>,
}

impl Method {
    /// Resolve the kind of `name` and validate `options` against it.
    pub fn new(name: &str, options: &str) -> Result<Self, CalibrationError> {
        if name.is_empty() {
            return Err(CalibrationError::Configuration("empty method name".to_string()));
        }
        let kind = MethodKind::lookup(name)?;
        let options = MethodOptions::parse(options)?;
        for key in options.unrecognised(kind) {
            warn!("Option {} is not used by method {} ({}) and will be ignored.", key, name, kind);
        }
        let config = RegressorConfig::from_options(kind, &options)?;
        Ok(Method {
            name: name.to_string(),
            kind,
            options,
            config,
            state: MethodState::Configured,
            model: None,
        })
    }

    pub fn state(&self) -> MethodState {
        self.state
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Move to `next`. Moving backwards, or between terminal states, fails.
    pub fn transition(&mut self, next: MethodState) -> Result<(), CalibrationError> {
        if next.rank() <= self.state.rank() {
            return Err(CalibrationError::InvalidState(
                self.name.clone(),
                self.state.to_string(),
                next.to_string(),
            ));
        }
        self.state = next;
        Ok(())
    }

    /// Attach a model and move to `next`.
    pub(crate) fn attach(&mut self, model: TrainedModel, next: MethodState) -> Result<(), CalibrationError> {
        self.transition(next)?;
        self.model = Some(model);
        Ok(())
    }

    /// Whether the method contributes outputs during evaluation.
    pub fn is_active(&self) -> bool {
        self.model.is_some() && matches!(self.state, MethodState::Trained | MethodState::Applied)
    }
}
