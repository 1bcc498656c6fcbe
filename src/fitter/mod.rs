//! Uniform fitting interface over the optimization backends.
//!
//! Backends are resolved by name from a static registration table. Each
//! entry declares its [`BackendKind`], which fixes at selection time what
//! the initial vector looks like:
//!
//! - local methods take one scalar per fitted parameter,
//! - the population search takes one `[vmin, vmax]` interval per parameter,
//! - the ensemble sampler takes scalars and samples the parameter box.
//!
//! Scalars are checked against their bounds before any backend runs.
//! Backend failures propagate unchanged; nothing is retried here.

mod config;
mod output;

pub use self::config::{FitterConfig, DEFAULT_FLUSH_EVERY};
pub use self::output::{ChainFile, IterationLog};

use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SpecFitError};
use crate::optimizers::{
    BackendResult, ChainSink, DifferentialEvolution, EnsembleSampler, NelderMead, Objective,
    SimulatedAnnealing,
};
use crate::parameters::{Parameter, ParameterKey};

/// Shape of the input a backend needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Scalar start, bounds enforced
    LocalBounded,
    /// Scalar start, bounds ignored by the backend
    LocalUnbounded,
    /// Interval start
    GlobalPopulation,
    /// Scalar start inside a finite box, walkers streamed to a chain file
    EnsembleSampler,
}

impl BackendKind {
    /// Whether the initial vector holds intervals instead of scalars.
    pub fn takes_intervals(self) -> bool {
        self == BackendKind::GlobalPopulation
    }
}

/// Concrete algorithm behind a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    NelderMead,
    NelderMeadBounded,
    SimulatedAnnealing,
    DifferentialEvolution,
    EnsembleSampler,
}

/// Entry of the registration table
#[derive(Debug)]
pub struct BackendDescriptor {
    pub name: &'static str,
    pub kind: BackendKind,
    pub algorithm: Algorithm,
    pub keywords: &'static [&'static str],
    pub description: &'static str,
}

impl BackendDescriptor {
    pub fn permits(&self, keyword: &str) -> bool {
        self.keywords.contains(&keyword)
    }
}

impl fmt::Display for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<24} {:<18} [{}] {}",
            self.name,
            format!("{:?}", self.kind),
            self.keywords.join(", "),
            self.description
        )
    }
}

static BACKENDS: [BackendDescriptor; 5] = [
    BackendDescriptor {
        name: "nelder_mead",
        kind: BackendKind::LocalUnbounded,
        algorithm: Algorithm::NelderMead,
        keywords: &["xtol", "ftol", "maxiter", "maxfun"],
        description: "Downhill simplex without bounds",
    },
    BackendDescriptor {
        name: "nelder_mead_bounded",
        kind: BackendKind::LocalBounded,
        algorithm: Algorithm::NelderMeadBounded,
        keywords: &["xtol", "ftol", "maxiter", "maxfun"],
        description: "Downhill simplex clipped to the parameter bounds",
    },
    BackendDescriptor {
        name: "simulated_annealing",
        kind: BackendKind::LocalBounded,
        algorithm: Algorithm::SimulatedAnnealing,
        keywords: &["maxiter", "temperature", "cooling", "step"],
        description: "Simulated annealing inside the parameter bounds",
    },
    BackendDescriptor {
        name: "differential_evolution",
        kind: BackendKind::GlobalPopulation,
        algorithm: Algorithm::DifferentialEvolution,
        keywords: &["popsize", "tol", "atol", "maxiter", "mutation", "recombination"],
        description: "Differential evolution over the parameter box",
    },
    BackendDescriptor {
        name: "ensemble_sampler",
        kind: BackendKind::EnsembleSampler,
        algorithm: Algorithm::EnsembleSampler,
        keywords: &["nwalkers", "niter", "scale"],
        description: "Affine-invariant ensemble sampler of exp(-chi2/2)",
    },
];

/// Keywords that must be non-negative integers
const COUNT_KEYWORDS: [&str; 5] = ["maxiter", "maxfun", "popsize", "nwalkers", "niter"];

/// Every registered backend.
pub fn list_backends() -> &'static [BackendDescriptor] {
    &BACKENDS
}

/// Look up a backend by name.
pub fn backend(name: &str) -> Result<&'static BackendDescriptor> {
    BACKENDS.iter().find(|d| d.name == name).ok_or_else(|| {
        SpecFitError::Configuration(format!(
            "unknown fitter {}, choose one of: {}",
            name,
            BACKENDS.iter().map(|d| d.name).collect::<Vec<_>>().join(", ")
        ))
    })
}

/// Start of a fit in the representation the backend needs
#[derive(Debug, Clone, PartialEq)]
pub enum InitialVector {
    Values(Array1<f64>),
    Intervals(Vec<(f64, f64)>),
}

impl InitialVector {
    pub fn len(&self) -> usize {
        match self {
            InitialVector::Values(v) => v.len(),
            InitialVector::Intervals(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of [`Fitter::optimize`]
#[derive(Debug, Clone)]
pub struct FitResult {
    pub backend: &'static str,
    /// Best vector, in registry fitted order
    pub params: Array1<f64>,
    pub chi2: f64,
    pub iterations: usize,
    pub func_evals: usize,
    pub success: bool,
    pub message: String,
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Result ({}):", self.backend)?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Chi2: {:.6}", self.chi2)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// A backend bound to the fitted parameters it was chosen for
#[derive(Debug)]
pub struct Fitter {
    descriptor: &'static BackendDescriptor,
    config: FitterConfig,
    keys: Vec<ParameterKey>,
    bounds: Vec<(f64, f64)>,
    init_step: Array1<f64>,
    result: Option<FitResult>,
}

impl Fitter {
    /// Choose a backend by name for the given fitted parameters.
    ///
    /// # Arguments
    ///
    /// * `name` - Name in the registration table
    /// * `fitted` - Fitted parameters in registry order
    /// * `init_step` - Initial step of local methods, `(vmax - vmin) / 4` when absent
    /// * `keywords` - Backend keywords
    ///
    /// # Errors
    ///
    /// * `Configuration` for an unknown name or a keyword the backend does not take
    pub fn choose(
        name: &str,
        fitted: &[&Parameter],
        init_step: Option<Array1<f64>>,
        keywords: BTreeMap<String, f64>,
    ) -> Result<Self> {
        let config = FitterConfig {
            keywords,
            ..FitterConfig::new(name)
        };
        Self::from_config(config, fitted, init_step)
    }

    /// Recreate a fitter from a saved configuration.
    pub fn from_config(
        config: FitterConfig,
        fitted: &[&Parameter],
        init_step: Option<Array1<f64>>,
    ) -> Result<Self> {
        let descriptor = backend(&config.backend)?;
        for (key, value) in &config.keywords {
            if !descriptor.permits(key) {
                return Err(SpecFitError::Configuration(format!(
                    "keyword {} is not accepted by {} (accepted: {})",
                    key,
                    descriptor.name,
                    descriptor.keywords.join(", ")
                )));
            }
            let whole = value.is_finite() && *value >= 0.0 && value.fract() == 0.0;
            if COUNT_KEYWORDS.contains(&key.as_str()) && !whole {
                return Err(SpecFitError::Configuration(format!(
                    "keyword {} must be a non-negative integer, got {}",
                    key, value
                )));
            }
        }

        let init_step = match init_step {
            Some(step) if step.len() != fitted.len() => {
                return Err(SpecFitError::DataMismatch(format!(
                    "{} initial steps given for {} fitted parameters",
                    step.len(),
                    fitted.len()
                )))
            }
            Some(step) => step,
            None => fitted.iter().map(|p| default_step(p)).collect(),
        };

        log::debug!(
            "chose fitter {} for {} fitted parameters",
            descriptor.name,
            fitted.len()
        );

        Ok(Self {
            descriptor,
            config,
            keys: fitted.iter().map(|p| p.key()).collect(),
            bounds: fitted.iter().map(|p| (p.vmin(), p.vmax())).collect(),
            init_step,
            result: None,
        })
    }

    pub fn with_iteration_log<P: Into<std::path::PathBuf>>(mut self, path: P) -> Self {
        self.config.iteration_log = Some(path.into());
        self
    }

    pub fn with_chain_file<P: Into<std::path::PathBuf>>(mut self, path: P) -> Self {
        self.config.chain_file = Some(path.into());
        self
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.config.flush_every = flush_every;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn kind(&self) -> BackendKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &'static BackendDescriptor {
        self.descriptor
    }

    pub fn config(&self) -> &FitterConfig {
        &self.config
    }

    /// Fitted parameters the fitter was chosen for
    pub fn keys(&self) -> &[ParameterKey] {
        &self.keys
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn init_step(&self) -> &Array1<f64> {
        &self.init_step
    }

    /// Result of the last fit
    pub fn result(&self) -> Option<&FitResult> {
        self.result.as_ref()
    }

    /// Initial vector for the chosen backend built from the current values.
    pub fn initial_vector(&self, values: &Array1<f64>) -> InitialVector {
        if self.descriptor.kind.takes_intervals() {
            InitialVector::Intervals(self.bounds.clone())
        } else {
            InitialVector::Values(values.clone())
        }
    }

    /// Run the backend on `objective` from `initial`.
    ///
    /// # Errors
    ///
    /// * `Configuration` if nothing is fitted or `initial` has the wrong shape
    /// * `DataMismatch` if lengths differ from the fitted count
    /// * `BoundsViolation` if a scalar start lies outside its bounds
    pub fn optimize<O: Objective + ?Sized>(
        &mut self,
        objective: &mut O,
        initial: &InitialVector,
    ) -> Result<FitResult> {
        let n = self.keys.len();
        if n == 0 {
            return Err(SpecFitError::Configuration(
                "no parameters are fitted".to_string(),
            ));
        }
        if initial.len() != n {
            return Err(SpecFitError::DataMismatch(format!(
                "initial vector has {} entries for {} fitted parameters",
                initial.len(),
                n
            )));
        }
        match initial {
            InitialVector::Values(values) => {
                if self.descriptor.kind.takes_intervals() {
                    return Err(SpecFitError::Configuration(format!(
                        "{} starts from [vmin, vmax] intervals, not values",
                        self.descriptor.name
                    )));
                }
                for ((value, &(vmin, vmax)), key) in
                    values.iter().zip(self.bounds.iter()).zip(self.keys.iter())
                {
                    if !(*value >= vmin && *value <= vmax) {
                        return Err(SpecFitError::BoundsViolation(format!(
                            "initial value {} of {} lies outside [{}, {}]",
                            value, key, vmin, vmax
                        )));
                    }
                }
            }
            InitialVector::Intervals(intervals) => {
                if !self.descriptor.kind.takes_intervals() {
                    return Err(SpecFitError::Configuration(format!(
                        "{} starts from values, not intervals",
                        self.descriptor.name
                    )));
                }
                if let Some((&(lo, hi), key)) = intervals
                    .iter()
                    .zip(self.keys.iter())
                    .find(|((lo, hi), _)| !(lo <= hi))
                {
                    return Err(SpecFitError::Configuration(format!(
                        "interval [{}, {}] of {} is empty",
                        lo, hi, key
                    )));
                }
            }
        }

        let mut iteration_log = match &self.config.iteration_log {
            Some(path) => Some(IterationLog::create(path, &self.keys, self.config.flush_every)?),
            None => None,
        };

        log::info!(
            "starting fit with {} over {} parameters",
            self.descriptor.name,
            n
        );

        let outcome = {
            let mut evaluations = 0usize;
            let mut logged = |x: &Array1<f64>| -> Result<f64> {
                let chi2 = objective.evaluate(x)?;
                evaluations += 1;
                if let Some(iteration_log) = iteration_log.as_mut() {
                    iteration_log.record(x, chi2)?;
                }
                log::debug!("evaluation {}: chi2 = {:.6}", evaluations, chi2);
                if evaluations % 100 == 0 {
                    log::info!("{} evaluations, last chi2 = {:.6}", evaluations, chi2);
                }
                Ok(chi2)
            };
            self.run(&mut logged, initial)
        };

        if let Some(iteration_log) = iteration_log.as_mut() {
            iteration_log.flush()?;
        }
        let outcome = outcome?;
        self.check_length(&outcome.params)?;

        let result = FitResult {
            backend: self.descriptor.name,
            params: outcome.params,
            chi2: outcome.cost,
            iterations: outcome.iterations,
            func_evals: outcome.func_evals,
            success: outcome.success,
            message: outcome.message,
        };
        log::info!(
            "{} finished: chi2 = {:.6} after {} evaluations ({})",
            result.backend,
            result.chi2,
            result.func_evals,
            result.message
        );
        self.result = Some(result.clone());
        Ok(result)
    }

    fn check_length(&self, params: &Array1<f64>) -> Result<()> {
        if params.len() != self.keys.len() {
            return Err(SpecFitError::DataMismatch(format!(
                "{} returned {} values for {} fitted parameters",
                self.descriptor.name,
                params.len(),
                self.keys.len()
            )));
        }
        Ok(())
    }

    fn keyword(&self, key: &str) -> Option<f64> {
        self.config.keywords.get(key).copied()
    }

    fn count(&self, key: &str) -> Option<usize> {
        self.keyword(key).map(|v| v as usize)
    }

    fn run<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        initial: &InitialVector,
    ) -> Result<BackendResult> {
        let seed = self.config.seed;
        match (self.descriptor.algorithm, initial) {
            (Algorithm::NelderMead | Algorithm::NelderMeadBounded, InitialVector::Values(x0)) => {
                let mut nm = NelderMead::new();
                if let Some(xtol) = self.keyword("xtol") {
                    nm.xtol = xtol;
                }
                if let Some(ftol) = self.keyword("ftol") {
                    nm.ftol = ftol;
                }
                nm.max_iterations = self.count("maxiter");
                nm.max_evaluations = self.count("maxfun");
                let bounds = match self.descriptor.algorithm {
                    Algorithm::NelderMeadBounded => Some(self.bounds.as_slice()),
                    _ => None,
                };
                nm.minimize(objective, x0, &self.init_step, bounds)
            }
            (Algorithm::SimulatedAnnealing, InitialVector::Values(x0)) => {
                let mut sa = SimulatedAnnealing::new();
                if let Some(maxiter) = self.count("maxiter") {
                    sa.max_iterations = maxiter;
                }
                if let Some(temperature) = self.keyword("temperature") {
                    sa.initial_temp = temperature;
                }
                if let Some(cooling) = self.keyword("cooling") {
                    sa.cooling_rate = cooling;
                }
                if let Some(step) = self.keyword("step") {
                    sa.step_size = step;
                }
                sa.seed = seed;
                sa.minimize(objective, x0, &self.bounds)
            }
            (Algorithm::DifferentialEvolution, InitialVector::Intervals(intervals)) => {
                let mut de = DifferentialEvolution::new();
                if let Some(popsize) = self.count("popsize") {
                    de.pop_size_multiplier = popsize;
                }
                if let Some(tol) = self.keyword("tol") {
                    de.tol = tol;
                }
                if let Some(atol) = self.keyword("atol") {
                    de.atol = atol;
                }
                if let Some(maxiter) = self.count("maxiter") {
                    de.max_iterations = maxiter;
                }
                if let Some(mutation) = self.keyword("mutation") {
                    de.differential_weight = mutation;
                }
                if let Some(recombination) = self.keyword("recombination") {
                    de.crossover_prob = recombination;
                }
                de.seed = seed;
                de.minimize(objective, intervals)
            }
            (Algorithm::EnsembleSampler, InitialVector::Values(x0)) => {
                let mut sampler = EnsembleSampler::new();
                sampler.nwalkers = self.count("nwalkers");
                if let Some(niter) = self.count("niter") {
                    sampler.niter = niter;
                }
                if let Some(scale) = self.keyword("scale") {
                    sampler.scale = scale;
                }
                sampler.seed = seed;
                let mut chain = match &self.config.chain_file {
                    Some(path) => Some(ChainFile::create(path, &self.keys)?),
                    None => None,
                };
                let sink = chain.as_mut().map(|c| c as &mut dyn ChainSink);
                sampler.sample(objective, x0, &self.bounds, sink)
            }
            (algorithm, _) => Err(SpecFitError::Configuration(format!(
                "{:?} cannot start from this initial vector",
                algorithm
            ))),
        }
    }
}

/// Quarter of the bound width, or a small fraction of the value when unbounded.
fn default_step(parameter: &Parameter) -> f64 {
    let width = parameter.vmax() - parameter.vmin();
    if width.is_finite() && width > 0.0 {
        width / 4.0
    } else if parameter.value() != 0.0 {
        0.05 * parameter.value().abs()
    } else {
        0.00025
    }
}
