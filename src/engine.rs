//! Regression Engine
//!
//! Classifies registry variables into targets, training inputs and
//! watched quantities, then trains and applies every configured method.
use crate::artifact::{weights_path, ArtifactIO, ArtifactStore};
use crate::constants::{DEFAULT_PROGRESS_INTERVAL, DEFAULT_SEED, OUTPUT_SEPARATOR};
use crate::cut::Cut;
use crate::data::{Matrix, Sample};
use crate::errors::CalibrationError;
use crate::method::{Method, MethodState};
use crate::regressor::{rms_error, TrainedModel};
use crate::registry::VariableRegistry;
use crate::sampler::SplitPolicy;
use crate::source::EventSource;
use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Role of a variable in the regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Use {
    Target,
    Train,
    Watch,
}

impl Use {
    /// Parse a role name. Anything unrecognised is watched.
    pub fn parse(role: &str) -> Use {
        match role {
            "Target" => Use::Target,
            "Train" => Use::Train,
            "Watch" => Use::Watch,
            other => {
                debug!("Unrecognised role {}, treating the variable as Watch.", other);
                Use::Watch
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub role: Use,
    pub slot: usize,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("tmva_test")
}
fn default_run_name() -> String {
    "TMVARegression".to_string()
}
fn default_seed() -> u64 {
    DEFAULT_SEED
}
fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}
fn default_methods() -> Vec<(String, String)> {
    vec![
        ("LD".to_string(), "!H:!V".to_string()),
        ("KNN".to_string(), "nkNN=20:ScaleFrac=0.8:UseKernel=F".to_string()),
        (
            "MLP".to_string(),
            "!H:!V:NeuronType=tanh:NCycles=500:HiddenLayers=N,N-1:LearningRate=0.02".to_string(),
        ),
        (
            "BDTG".to_string(),
            "!H:!V:NTrees=200:Shrinkage=0.1:UseBaggedBoost:BaggedSampleFraction=0.5:nCuts=20:MaxDepth=3"
                .to_string(),
        ),
    ]
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `(role, name)` pairs.
    #[serde(default)]
    pub variables: Vec<(String, String)>,
    /// `(method name, option string)` pairs.
    #[serde(default = "default_methods")]
    pub methods: Vec<(String, String)>,
    /// Selection applied to events before training.
    #[serde(default)]
    pub training_cut: String,
    /// Selection applied to events after evaluation, before they are written.
    #[serde(default)]
    pub application_cut: String,
    #[serde(default)]
    pub split: SplitPolicy,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_run_name")]
    pub run_name: String,
    /// Seed for method training.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Log progress every this many entries, `0` disables it.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            variables: Vec::new(),
            methods: default_methods(),
            training_cut: String::new(),
            application_cut: String::new(),
            split: SplitPolicy::default(),
            out_dir: default_out_dir(),
            run_name: default_run_name(),
            seed: default_seed(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl EngineConfig {
    pub fn new<R, N, M, O>(variables: Vec<(R, N)>, methods: Vec<(M, O)>) -> Self
    where
        R: Into<String>,
        N: Into<String>,
        M: Into<String>,
        O: Into<String>,
    {
        EngineConfig {
            variables: variables.into_iter().map(|(r, n)| (r.into(), n.into())).collect(),
            methods: methods.into_iter().map(|(m, o)| (m.into(), o.into())).collect(),
            ..Default::default()
        }
    }
}

/// Output keys for `targets` and `methods`: each target, followed by one
/// `target_method` key per method.
pub fn generate_outputs<T: AsRef<str>, M: AsRef<str>>(targets: &[T], methods: &[M]) -> Vec<String> {
    let mut outputs = Vec::with_capacity(targets.len() * (methods.len() + 1));
    for target in targets {
        outputs.push(target.as_ref().to_string());
        for method in methods {
            outputs.push(format!("{}{}{}", target.as_ref(), OUTPUT_SEPARATOR, method.as_ref()));
        }
    }
    outputs
}

/// Outcome of training one method.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub method: String,
    pub n_train: usize,
    pub n_test: usize,
    /// Root mean squared error on the test sample, per target. NaN without
    /// test events.
    pub test_rms: Vec<f64>,
    pub artifact: PathBuf,
}

/// Counters of an application pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplicationReport {
    pub entries: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub bytes: u64,
    /// Accepted entries the caller's sink could not use.
    pub unsummarised: u64,
}

pub struct RegressionEngine {
    variables: Vec<Variable>,
    methods: Vec<Method>,
    training_cut: Cut,
    application_cut: Cut,
    split: SplitPolicy,
    out_dir: PathBuf,
    run_name: String,
    seed: u64,
    progress_interval: u64,
    feature_slots: Vec<usize>,
    target_slots: Vec<usize>,
}

impl RegressionEngine {
    /// Validate `config` against `registry`.
    ///
    /// Every configuration problem is reported here, before any event is read.
    pub fn configure(config: &EngineConfig, registry: &VariableRegistry) -> Result<Self, CalibrationError> {
        let mut variables = Vec::with_capacity(config.variables.len());
        let mut seen = HashSet::new();
        for (role, name) in &config.variables {
            let slot = registry.slot(name)?;
            if !seen.insert(name.as_str()) {
                return Err(CalibrationError::DuplicateVariable(name.clone()));
            }
            variables.push(Variable {
                name: name.clone(),
                role: Use::parse(role),
                slot,
            });
        }
        let slots = |role: Use| -> Vec<usize> {
            variables.iter().filter(|v| v.role == role).map(|v| v.slot).collect()
        };
        let target_slots = slots(Use::Target);
        let feature_slots = slots(Use::Train);
        if target_slots.is_empty() {
            return Err(CalibrationError::Configuration(
                "at least one Target variable is required".to_string(),
            ));
        }
        if feature_slots.is_empty() {
            return Err(CalibrationError::Configuration(
                "at least one Train variable is required".to_string(),
            ));
        }

        let mut methods: Vec<Method> = Vec::with_capacity(config.methods.len());
        for (name, options) in &config.methods {
            if methods.iter().any(|m| &m.name == name) {
                return Err(CalibrationError::Configuration(format!(
                    "method {} is booked more than once",
                    name
                )));
            }
            methods.push(Method::new(name, options)?);
        }
        if methods.is_empty() {
            warn!("No regression methods booked, only pass-through outputs will be produced.");
        }

        Ok(RegressionEngine {
            variables,
            methods,
            training_cut: Cut::compile(&config.training_cut, registry)?,
            application_cut: Cut::compile(&config.application_cut, registry)?,
            split: config.split.clone(),
            out_dir: config.out_dir.clone(),
            run_name: config.run_name.clone(),
            seed: config.seed,
            progress_interval: config.progress_interval,
            feature_slots,
            target_slots,
        })
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    fn names_with(&self, role: Use) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| v.role == role)
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<String> {
        self.names_with(Use::Target)
    }

    pub fn features(&self) -> Vec<String> {
        self.names_with(Use::Train)
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Ordered output keys of the methods that currently hold a model.
    pub fn outputs(&self) -> Vec<String> {
        let active: Vec<&str> = self
            .methods
            .iter()
            .filter(|m| m.is_active())
            .map(|m| m.name.as_str())
            .collect();
        generate_outputs(&self.targets(), &active)
    }

    fn log_progress(&self, entry: u64, entries: u64) {
        if self.progress_interval > 0 && entry % self.progress_interval == 0 {
            info!("Processing entry {}/{}...", entry, entries);
        }
    }

    /// Train every method on the events of `source` passing the training cut.
    ///
    /// Artifacts are written to `store` at the configured weights path.
    pub fn train<S, A>(
        &mut self,
        registry: &mut VariableRegistry,
        source: &mut S,
        store: &mut A,
    ) -> Result<Vec<TrainingReport>, CalibrationError>
    where
        S: EventSource,
        A: ArtifactStore + ?Sized,
    {
        info!("Training {} method(s) on {} entries.", self.methods.len(), source.entries());
        let mut sample = Sample::new();
        let (mut rejected, mut incomplete) = (0u64, 0u64);
        {
            let mut cursor = registry.bind(source)?;
            let entries = cursor.entries();
            while let Some(entry) = cursor.next_entry()? {
                self.log_progress(entry, entries);
                let reg = cursor.registry();
                if !self.training_cut.passes(reg) {
                    rejected += 1;
                    continue;
                }
                let features: Option<Vec<f64>> = self.feature_slots.iter().map(|&s| reg.get_slot(s)).collect();
                let targets: Option<Vec<f64>> = self.target_slots.iter().map(|&s| reg.get_slot(s)).collect();
                match (features, targets) {
                    (Some(f), Some(t)) => sample.push(f, t),
                    _ => {
                        debug!("Entry {} has unset inputs and is skipped.", entry);
                        incomplete += 1;
                    }
                }
            }
        }
        info!(
            "{} events selected for training, {} rejected by the cut, {} incomplete.",
            sample.len(),
            rejected,
            incomplete
        );
        let method_names = || {
            self.methods
                .iter()
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        if sample.is_empty() {
            return Err(CalibrationError::EmptyTrainingSample(method_names()));
        }
        let (train_idx, test_idx) = self.split.split(sample.len())?;
        if train_idx.is_empty() {
            return Err(CalibrationError::EmptyTrainingSample(method_names()));
        }

        let features = self.features();
        let targets = self.targets();
        let n_features = features.len();
        let train_block = sample.feature_block(&train_idx, n_features);
        let test_block = sample.feature_block(&test_idx, n_features);
        let train_data = Matrix::new(&train_block, train_idx.len(), n_features);
        let test_data = Matrix::new(&test_block, test_idx.len(), n_features);

        let mut reports = Vec::with_capacity(self.methods.len());
        for (m, method) in self.methods.iter_mut().enumerate() {
            info!("Training method {} ({}).", method.name, method.kind);
            let mut models = Vec::with_capacity(targets.len());
            let mut test_rms = Vec::with_capacity(targets.len());
            for t in 0..targets.len() {
                let y = sample.target_column(&train_idx, t);
                let seed = self.seed.wrapping_add((m * targets.len() + t) as u64);
                let model = method.config.fit(&train_data, &y, seed)?;
                test_rms.push(rms_error(&model, &test_data, &sample.target_column(&test_idx, t)));
                models.push(model);
            }
            let trained = TrainedModel {
                method: method.name.clone(),
                kind: method.kind,
                features: features.clone(),
                targets: targets.clone(),
                models,
            };
            let artifact = weights_path(&self.out_dir, &self.run_name, &method.name);
            trained.save_artifact(store, &artifact)?;
            method.attach(trained, MethodState::Trained)?;
            info!("Method {} written to {}.", method.name, artifact.display());
            reports.push(TrainingReport {
                method: method.name.clone(),
                n_train: train_idx.len(),
                n_test: test_idx.len(),
                test_rms,
                artifact,
            });
        }
        Ok(reports)
    }

    /// Load the artifact of every method for application.
    ///
    /// A method without an artifact becomes unavailable and is reported in
    /// the returned diagnostics. The remaining methods still apply.
    pub fn prepare_application<A: ArtifactStore + ?Sized>(
        &mut self,
        store: &A,
        artifact_root: &Path,
        run_name: &str,
    ) -> Result<Vec<CalibrationError>, CalibrationError> {
        let features = self.features();
        let targets = self.targets();
        let mut diagnostics = Vec::new();
        for method in self.methods.iter_mut() {
            let path = weights_path(artifact_root, run_name, &method.name);
            if !store.exists(&path) {
                warn!(
                    "Weights for method {} not found at {}, it will not be applied.",
                    method.name,
                    path.display()
                );
                method.transition(MethodState::Unavailable)?;
                diagnostics.push(CalibrationError::MissingArtifact {
                    method: method.name.clone(),
                    path: path.display().to_string(),
                });
                continue;
            }
            let model = TrainedModel::load_artifact(store, &path)?;
            if model.features != features || model.targets != targets || model.models.len() != targets.len() {
                return Err(CalibrationError::Configuration(format!(
                    "artifact {} was trained on features [{}] and targets [{}]",
                    path.display(),
                    model.features.join(", "),
                    model.targets.join(", ")
                )));
            }
            model
                .validate()
                .map_err(|e| CalibrationError::UnableToRead(format!("{}: {}", path.display(), e)))?;
            method.attach(model, MethodState::Applied)?;
            info!("Method {} loaded from {}.", method.name, path.display());
        }
        Ok(diagnostics)
    }

    /// Outputs for the record currently held by `registry`.
    ///
    /// Targets that are set pass through under their own name. Each active
    /// method adds `target_method` for every target, provided all training
    /// inputs are set.
    pub fn evaluate(&self, registry: &VariableRegistry) -> HashMap<String, f64> {
        let mut values = HashMap::new();
        let targets: Vec<&Variable> = self.variables.iter().filter(|v| v.role == Use::Target).collect();
        for target in &targets {
            if let Some(v) = registry.get_slot(target.slot) {
                values.insert(target.name.clone(), v);
            }
        }
        let features: Option<Vec<f64>> = self.feature_slots.iter().map(|&s| registry.get_slot(s)).collect();
        let features = match features {
            Some(f) => f,
            None => return values,
        };
        for method in self.methods.iter().filter(|m| m.is_active()) {
            if let Some(model) = method.model() {
                for (target, prediction) in targets.iter().zip(model.predict(&features)) {
                    values.insert(
                        format!("{}{}{}", target.name, OUTPUT_SEPARATOR, method.name),
                        prediction,
                    );
                }
            }
        }
        values
    }

    /// Application pass over `source`.
    ///
    /// For every entry the output registry is reset, the record evaluated
    /// and, if it passes the application cut, written to `outputs` and handed
    /// to `sink`. A read failure aborts the pass.
    pub fn apply<S, F>(
        &self,
        registry: &mut VariableRegistry,
        source: &mut S,
        outputs: &mut VariableRegistry,
        mut sink: F,
    ) -> Result<ApplicationReport, CalibrationError>
    where
        S: EventSource,
        F: FnMut(&VariableRegistry, &VariableRegistry) -> Result<(), CalibrationError>,
    {
        let mut report = ApplicationReport::default();
        let mut cursor = registry.bind(source)?;
        let entries = cursor.entries();
        let active = self.methods.iter().filter(|m| m.is_active()).count();
        info!("Applying {} method(s) to {} entries.", active, entries);
        while let Some(entry) = {
            outputs.reset();
            cursor.next_entry()?
        } {
            self.log_progress(entry, entries);
            report.entries += 1;
            let reg = cursor.registry();
            let values = self.evaluate(reg);
            if !self.application_cut.passes(reg) {
                report.rejected += 1;
                continue;
            }
            for (key, value) in values.iter() {
                if let Ok(slot) = outputs.slot(key) {
                    outputs.set_slot(slot, Some(*value));
                }
            }
            report.accepted += 1;
            sink(reg, &*outputs)?;
        }
        report.bytes = cursor.bytes_read();
        info!(
            "Application finished: {} entries, {} accepted, {} rejected.",
            report.entries, report.accepted, report.rejected
        );
        Ok(report)
    }
}
