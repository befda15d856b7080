//! Pipeline
//!
//! Sequential driver tying the registry, the regression engine and the
//! resolution analyzer together: configure, train, prepare, apply, reduce.
use crate::artifact::ArtifactStore;
use crate::config::CalibrationConfig;
use crate::engine::{generate_outputs, ApplicationReport, RegressionEngine, TrainingReport};
use crate::errors::CalibrationError;
use crate::registry::VariableRegistry;
use crate::resolution::{Reduction, ResolutionAnalyzer};
use crate::source::EventSource;
use hashbrown::HashMap;
use log::{debug, info, warn};

pub struct CalibrationPipeline {
    config: CalibrationConfig,
    registry: VariableRegistry,
    engine: RegressionEngine,
    analyzer: Option<ResolutionAnalyzer>,
    true_energy: usize,
}

impl CalibrationPipeline {
    /// Build the registry from the engine variables, in order, and
    /// configure the engine against it.
    pub fn new(config: CalibrationConfig) -> Result<Self, CalibrationError> {
        let registry = VariableRegistry::new(config.engine.variables.iter().map(|(_, name)| name.clone()))?;
        let engine = RegressionEngine::configure(&config.engine, &registry)?;
        let true_energy = registry.slot(&config.true_energy)?;
        let method_names: Vec<&str> = engine.methods().iter().map(|m| m.name.as_str()).collect();
        let possible = generate_outputs(&engine.targets(), &method_names);
        if let Some(key) = config.keys.iter().find(|k| !possible.contains(k)) {
            return Err(CalibrationError::Configuration(format!(
                "output {} is not produced by any target or method",
                key
            )));
        }
        Ok(CalibrationPipeline {
            config,
            registry,
            engine,
            analyzer: None,
            true_energy,
        })
    }

    pub fn engine(&self) -> &RegressionEngine {
        &self.engine
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Analyzer filled by [`CalibrationPipeline::apply`], if it ran.
    pub fn analyzer(&self) -> Option<&ResolutionAnalyzer> {
        self.analyzer.as_ref()
    }

    pub fn train<S, A>(&mut self, source: &mut S, store: &mut A) -> Result<Vec<TrainingReport>, CalibrationError>
    where
        S: EventSource,
        A: ArtifactStore + ?Sized,
    {
        self.engine.train(&mut self.registry, source, store)
    }

    /// Load the artifacts of the configured run. Missing artifacts are
    /// returned as diagnostics.
    pub fn prepare<A: ArtifactStore + ?Sized>(&mut self, store: &A) -> Result<Vec<CalibrationError>, CalibrationError> {
        let root = self.config.engine.out_dir.clone();
        let run_name = self.config.engine.run_name.clone();
        self.engine.prepare_application(store, &root, &run_name)
    }

    /// Application pass, accumulating every accepted event into the analyzer.
    ///
    /// The analyzer is created on the first call, over the configured keys or
    /// every current engine output. On a read failure the error is returned
    /// and everything accumulated so far is kept.
    pub fn apply<S: EventSource>(&mut self, source: &mut S) -> Result<ApplicationReport, CalibrationError> {
        if self.analyzer.is_none() {
            let keys = if self.config.keys.is_empty() {
                self.engine.outputs()
            } else {
                self.config.keys.clone()
            };
            info!("Summarising outputs: {}.", keys.join(", "));
            self.analyzer = Some(ResolutionAnalyzer::new(
                self.config.bins.clone(),
                keys,
                self.config.analysis.clone(),
            )?);
        }
        let CalibrationPipeline {
            registry,
            engine,
            analyzer,
            true_energy,
            ..
        } = self;
        let analyzer = match analyzer.as_mut() {
            Some(a) => a,
            None => return Err(CalibrationError::Configuration("analyzer is not available".to_string())),
        };
        let true_energy = *true_energy;
        let mut outputs = VariableRegistry::new(engine.outputs())?;
        let mut unsummarised = 0;
        let mut report = engine.apply(registry, source, &mut outputs, |inputs, outs| {
            let energy = match inputs.get_slot(true_energy) {
                Some(e) => e,
                None => {
                    debug!("Event without true energy is not summarised.");
                    unsummarised += 1;
                    return Ok(());
                }
            };
            let values: HashMap<String, f64> = outs
                .names()
                .iter()
                .zip(outs.values())
                .filter_map(|(name, v)| v.map(|v| (name.clone(), v)))
                .collect();
            analyzer.accumulate(energy, &values);
            Ok(())
        })?;
        if unsummarised > 0 {
            warn!("{} accepted events had no true energy and were not summarised.", unsummarised);
        }
        report.unsummarised = unsummarised;
        Ok(report)
    }

    /// Fit every bin and output accumulated so far.
    pub fn reduce(&self) -> Result<Reduction, CalibrationError> {
        match &self.analyzer {
            Some(analyzer) => Ok(analyzer.reduce()),
            None => Err(CalibrationError::Configuration(
                "nothing to reduce before an application pass".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{weights_path, MemoryArtifactStore};
    use crate::engine::EngineConfig;
    use crate::method::MethodState;
    use crate::resolution::{Estimator, Metric};
    use crate::source::MemorySource;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    const COLUMNS: [&str; 5] = ["ePar", "eLeadBHCal", "eLeadBEMC", "hLeadBHCal", "eSumBHCal"];

    /// Beam energies with a sampling-like response in both calorimeters.
    fn events(n_per_energy: usize, seed: u64) -> MemorySource {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut source = MemorySource::new(COLUMNS.to_vec(), Vec::new());
        for &e in &[2.0, 3.0, 5.0, 10.0] {
            let smear = Normal::new(0.0, 0.05 * e).unwrap();
            for _ in 0..n_per_energy {
                let frac: f64 = rng.gen_range(0.3..0.7);
                let hcal = 0.8 * frac * e + smear.sample(&mut rng);
                let ecal = 0.9 * (1.0 - frac) * e + smear.sample(&mut rng);
                source.push(vec![e, hcal, ecal, rng.gen_range(-1.0..1.0), hcal.max(0.0)]);
            }
        }
        source
    }

    fn config(methods: Vec<(&str, &str)>) -> CalibrationConfig {
        let mut engine = EngineConfig::new(
            vec![
                ("Target", "ePar"),
                ("Train", "eLeadBHCal"),
                ("Train", "eLeadBEMC"),
                ("Watch", "hLeadBHCal"),
                ("Watch", "eSumBHCal"),
            ],
            methods,
        );
        engine.training_cut = "(eSumBHCal>=0)&&(abs(hLeadBHCal)<1.1)".to_string();
        engine.progress_interval = 0;
        CalibrationConfig::new(engine)
    }

    #[test]
    fn test_train_apply_reduce() {
        let mut store = MemoryArtifactStore::new();
        let mut trainer = CalibrationPipeline::new(config(vec![("LD", "!H:!V")])).unwrap();
        let reports = trainer.train(&mut events(300, 1), &mut store).unwrap();
        assert!(reports[0].test_rms[0] < 1.0);

        let mut pipeline = CalibrationPipeline::new(config(vec![("LD", "!H:!V")])).unwrap();
        assert!(pipeline.prepare(&store).unwrap().is_empty());
        let report = pipeline.apply(&mut events(400, 2)).unwrap();
        assert_eq!(report.entries, 1600);
        let reduction = pipeline.reduce().unwrap();

        let linearity = reduction.points("ePar_LD", Metric::Linearity, Estimator::FitBased);
        let centers: Vec<f64> = linearity.iter().map(|p| p.0).collect();
        assert_eq!(centers, vec![2.0, 3.0, 5.0, 10.0]);
        for (center, mu, _) in &linearity {
            assert!((mu - center).abs() < 0.1 * center, "{} {}", center, mu);
        }
        let resolution = reduction.points("ePar_LD", Metric::Resolution, Estimator::MomentBased);
        assert_eq!(resolution.len(), 4);
        assert!(resolution.iter().all(|(_, r, e)| *r > 0.0 && *r < 0.2 && *e > 0.0));
        // the pass-through target is a spike in every bin
        assert!(reduction.points("ePar", Metric::Resolution, Estimator::FitBased).is_empty());
    }

    #[test]
    fn test_missing_artifact_is_not_summarised() {
        let mut store = MemoryArtifactStore::new();
        let methods = vec![("LD", ""), ("KNN", "nkNN=10")];
        let mut trainer = CalibrationPipeline::new(config(methods.clone())).unwrap();
        trainer.train(&mut events(100, 3), &mut store).unwrap();
        store.remove(&weights_path("tmva_test", "TMVARegression", "KNN"));

        let mut pipeline = CalibrationPipeline::new(config(methods)).unwrap();
        let diagnostics = pipeline.prepare(&store).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(pipeline.engine().method("KNN").unwrap().state(), MethodState::Unavailable);
        pipeline.apply(&mut events(100, 4)).unwrap();
        let analyzer = pipeline.analyzer().unwrap();
        assert_eq!(analyzer.keys(), &["ePar".to_string(), "ePar_LD".to_string()]);
        assert!(analyzer.entries("Ene2", "ePar_LD") > 0);
    }

    #[test]
    fn test_read_failure_keeps_partial_accumulation() {
        let mut store = MemoryArtifactStore::new();
        let mut c = config(vec![("LD", "")]);
        c.keys = vec!["ePar_LD".to_string()];
        let mut pipeline = CalibrationPipeline::new(c).unwrap();
        pipeline.train(&mut events(50, 5), &mut store).unwrap();
        let mut failing = events(50, 6).with_failure(30);
        assert!(matches!(
            pipeline.apply(&mut failing),
            Err(CalibrationError::SourceRead { entry: 30, .. })
        ));
        assert_eq!(pipeline.analyzer().unwrap().entries("Ene2", "ePar_LD"), 30);
        assert!(pipeline.reduce().is_ok());
    }

    #[test]
    fn test_events_without_true_energy_are_counted() {
        let mut store = MemoryArtifactStore::new();
        let mut c = config(vec![("LD", "")]);
        c.keys = vec!["ePar_LD".to_string()];
        let mut pipeline = CalibrationPipeline::new(c).unwrap();
        pipeline.train(&mut events(50, 7), &mut store).unwrap();

        let mut data = events(50, 8);
        for _ in 0..3 {
            data.push(vec![f64::NAN, 1.0, 1.0, 0.0, 1.0]);
        }
        let report = pipeline.apply(&mut data).unwrap();
        assert_eq!(report.entries, 203);
        assert_eq!(report.accepted, 203);
        assert_eq!(report.unsummarised, 3);
        let analyzer = pipeline.analyzer().unwrap();
        let summarised: usize = analyzer.bins().iter().map(|b| analyzer.entries(&b.tag, "ePar_LD")).sum();
        assert_eq!(summarised, 200);
    }

    #[test]
    fn test_invalid_configuration() {
        let mut c = config(vec![("LD", "")]);
        c.keys = vec!["ePar_MLP".to_string()];
        assert!(matches!(
            CalibrationPipeline::new(c),
            Err(CalibrationError::Configuration(_))
        ));
        let mut c = config(vec![("LD", "")]);
        c.true_energy = "eTrue".to_string();
        assert!(matches!(
            CalibrationPipeline::new(c),
            Err(CalibrationError::UnknownVariable(_))
        ));
        let pipeline = CalibrationPipeline::new(config(vec![("LD", "")])).unwrap();
        assert!(pipeline.reduce().is_err());
    }
}
