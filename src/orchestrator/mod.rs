//! # Orchestrator
//!
//! Owns the parameter registry, the observed spectra, the regions and the
//! comparison engine of one fitting session, and runs fits on them.
//!
//! ## Workflow
//!
//! 1. Register components in a [`ParameterRegistry`], attach observations
//!    and (optionally) regions.
//! 2. [`Orchestrator::setup`] propagates the groups demanded by regions and
//!    observations into the registry, then enumerates, synthesizes and
//!    populates the comparisons.
//! 3. Mark parameters as fitted, pick a backend with
//!    [`Orchestrator::choose_fitter`] and call [`Orchestrator::run_fit`]. The
//!    best vector found is written back into the registry, so the next run
//!    starts from it.
//!
//! ## Example
//!
//! ```no_run
//! use specfit_rs::observed::{ObservationSet, ObservedSpectrum};
//! use specfit_rs::orchestrator::Orchestrator;
//! use specfit_rs::parameters::{ParameterRegistry, ParameterUpdate};
//! use specfit_rs::synthetic::Synthesizer;
//! use std::collections::BTreeMap;
//!
//! fn fit<S: Synthesizer>(synthesizer: S) -> specfit_rs::Result<()> {
//!     let mut registry = ParameterRegistry::new();
//!     registry.add_component("primary", &BTreeMap::new())?;
//!
//!     let spectrum = ObservedSpectrum::from_file("epoch1.dat", Some(0.01))?;
//!     let observations = ObservationSet::from_spectra(vec![spectrum])?;
//!
//!     let mut session = Orchestrator::new(registry, synthesizer).with_observations(observations);
//!     session.setup()?;
//!     session.set_parameter(None, "teff", None, &ParameterUpdate::fitted(true))?;
//!     session.choose_fitter("nelder_mead_bounded", None, BTreeMap::new())?;
//!     let result = session.run_fit(None)?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

mod bootstrap;

pub use self::bootstrap::{BootstrapLimits, BootstrapSample};

use log::{debug, info, warn};
use ndarray::Array1;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::comparison::{ComparisonEngine, EngineState, EnumerationMode};
use crate::config::EngineConfig;
use crate::error::{Result, SpecFitError};
use crate::fitter::{FitResult, Fitter, FitterConfig};
use crate::observed::{ObservationSet, EDGE_TOLERANCE};
use crate::parameters::definitions::{self, LR, RV, VROT};
use crate::parameters::{GroupId, Parameter, ParameterKey, ParameterRegistry, ParameterUpdate, ALL_COMPONENTS};
use crate::persist::{ChiSquareSummary, SavedSession};
use crate::regions::RegionSet;
use crate::synthetic::Synthesizer;

/// Groups per component and parameter name
type GroupTable = BTreeMap<String, BTreeMap<String, Vec<GroupId>>>;

/// A fitting session
pub struct Orchestrator<S: Synthesizer> {
    registry: ParameterRegistry,
    observations: ObservationSet,
    regions: RegionSet,
    engine: ComparisonEngine,
    synthesizer: S,
    config: EngineConfig,

    /// Backend chosen by the user
    fitter: Option<FitterConfig>,
    init_step: Option<Array1<f64>>,

    /// Last fit and the fitted parameters it was run for
    last_fit: Option<(FitResult, Vec<ParameterKey>)>,
}

impl<S: Synthesizer> Orchestrator<S> {
    pub fn new(registry: ParameterRegistry, synthesizer: S) -> Self {
        let config = EngineConfig::default();
        Self {
            registry,
            observations: ObservationSet::new(),
            regions: RegionSet::with_tolerance(config.region_tolerance),
            engine: ComparisonEngine::new(config.mode),
            synthesizer,
            config,
            fitter: None,
            init_step: None,
            last_fit: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.engine = ComparisonEngine::new(config.mode);
        self.config = config;
        self
    }

    pub fn with_observations(mut self, observations: ObservationSet) -> Self {
        self.observations = observations;
        self.engine.invalidate();
        self
    }

    pub fn with_regions(mut self, regions: RegionSet) -> Self {
        self.regions = regions;
        self.engine.invalidate();
        self
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Direct access to the registry
    ///
    /// Creating or removing groups here makes the comparisons stale until
    /// [`setup`](Self::setup) runs again.
    pub fn registry_mut(&mut self) -> &mut ParameterRegistry {
        &mut self.registry
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    pub fn regions(&self) -> &RegionSet {
        &self.regions
    }

    pub fn engine(&self) -> &ComparisonEngine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn synthesizer(&self) -> &S {
        &self.synthesizer
    }

    pub fn fitter_config(&self) -> Option<&FitterConfig> {
        self.fitter.as_ref()
    }

    pub fn last_fit(&self) -> Option<&FitResult> {
        self.last_fit.as_ref().map(|(result, _)| result)
    }

    /// Prepare the comparisons
    ///
    /// Regions are derived from the observations when none were given.
    /// Groups used by regions and observations are created in the registry,
    /// groups of the observation-driven parameters nothing uses any more are
    /// dropped, and the comparisons are readied, synthesized and populated.
    ///
    /// # Returns
    ///
    /// The number of comparisons.
    pub fn setup(&mut self) -> Result<usize> {
        if self.registry.is_empty() {
            return Err(SpecFitError::Configuration(
                "no components are registered".to_string(),
            ));
        }
        self.engine.invalidate();
        if self.engine.mode() != self.config.mode {
            self.engine = ComparisonEngine::new(self.config.mode);
        }

        if self.regions.is_empty() {
            if self.observations.is_empty() {
                return Err(SpecFitError::Configuration(
                    "neither regions nor observed spectra are defined".to_string(),
                ));
            }
            let mut regions = RegionSet::with_tolerance(self.config.region_tolerance);
            regions.add_from_observations(self.observations.iter())?;
            info!("Derived {} regions from the observed spectra", regions.len());
            self.regions = regions;
        }
        self.regions.setup_undefined_groups();
        self.warn_uncovered_spectra();

        let region_groups = self.regions.region_groups();
        for (component, names) in &region_groups {
            if component != ALL_COMPONENTS && !self.registry.has_component(component) {
                return Err(SpecFitError::Configuration(format!(
                    "a region refers to unknown component {}",
                    component
                )));
            }
            for (name, groups) in names {
                self.registry.set_groups(component, name, groups)?;
            }
        }

        let observation_groups = self.observation_groups()?;
        for (component, names) in &observation_groups {
            for (name, groups) in names {
                self.registry.set_groups(component, name, groups)?;
            }
        }
        self.prune_groups(&region_groups, &observation_groups)?;

        let count = self
            .engine
            .ready(&self.registry, &self.regions, Some(&self.observations))?;
        self.engine.synthesize(&self.registry, &mut self.synthesizer, None)?;
        self.engine.populate(&self.registry, None)?;
        info!(
            "Set up {} comparisons for {} components, {} regions and {} spectra",
            count,
            self.registry.components().len(),
            self.regions.len(),
            self.observations.len()
        );
        Ok(count)
    }

    /// Replace the observed spectra and set up again
    pub fn set_observations(&mut self, observations: ObservationSet) -> Result<usize> {
        self.observations = observations;
        self.engine.invalidate();
        self.setup()
    }

    /// Replace the regions and set up again
    pub fn set_regions(&mut self, regions: RegionSet) -> Result<usize> {
        self.regions = regions;
        self.engine.invalidate();
        self.setup()
    }

    /// Choose the backend used by [`run_fit`](Self::run_fit)
    ///
    /// The keywords and the step are validated against the parameters that
    /// are fitted now. Iteration log, chain file, flush interval and seed come
    /// from the engine configuration.
    pub fn choose_fitter(
        &mut self,
        name: &str,
        init_step: Option<Array1<f64>>,
        keywords: BTreeMap<String, f64>,
    ) -> Result<()> {
        let config = self.fitter_config_for(name, keywords);
        let fitted = self.registry.fitted();
        let fitter = Fitter::from_config(config.clone(), &fitted, init_step.clone())?;
        info!("Chose fitter {}", fitter.descriptor());

        self.fitter = Some(config);
        self.init_step = init_step;
        Ok(())
    }

    /// Fit the fitted parameters and accept the result
    ///
    /// `subset` restricts the objective to some comparisons. Without a
    /// chosen fitter the bounded simplex is used.
    pub fn run_fit(&mut self, subset: Option<&[usize]>) -> Result<FitResult> {
        let config = match &self.fitter {
            Some(config) => config.clone(),
            None => self.fitter_config_for(&FitterConfig::default().backend, BTreeMap::new()),
        };
        let result = self.fit_with(config, self.init_step.clone(), subset)?;
        self.accept_fit()?;
        Ok(result)
    }

    /// Write the best vector of the last fit into the registry
    ///
    /// # Returns
    ///
    /// The total chi-square at the accepted vector.
    pub fn accept_fit(&mut self) -> Result<f64> {
        let (result, keys) = self
            .last_fit
            .as_ref()
            .ok_or_else(|| SpecFitError::State("no fit has been run".to_string()))?;
        if *keys != self.registry.fitted_keys() {
            return Err(SpecFitError::State(
                "fitted parameters changed since the last fit".to_string(),
            ));
        }

        let params = result.params.clone();
        self.apply_vector(&params)?;
        let chi2 = self.engine.total_chi2(None)?;
        info!("Accepted fit with chi2 = {:.6}", chi2);
        Ok(chi2)
    }

    /// Chi-square of an optimizer vector
    pub fn compute_chi2(&mut self, vector: &Array1<f64>, subset: Option<&[usize]>) -> Result<f64> {
        self.ensure_current()?;
        self.engine
            .compute_chi2(vector, &mut self.registry, &mut self.synthesizer, subset)
    }

    /// Chi-square of the populated comparisons
    pub fn current_chi2(&self) -> Result<f64> {
        self.ensure_current()?;
        self.engine.total_chi2(None)
    }

    /// Chi-square, degrees of freedom and reduced chi-square
    pub fn chi_square(&self) -> Result<ChiSquareSummary> {
        let chi2 = self.current_chi2()?;
        let dof = self
            .engine
            .degrees_of_freedom(self.registry.fitted_count(), None)?;
        Ok(ChiSquareSummary::new(chi2, dof))
    }

    /// Sample the posterior of the fitted parameters
    ///
    /// The chain goes to the configured chain file. The registry is left at
    /// its starting values; the most probable position is available through
    /// [`last_fit`](Self::last_fit) and [`accept_fit`](Self::accept_fit).
    pub fn run_mcmc(&mut self, nwalkers: Option<usize>, niter: usize) -> Result<FitResult> {
        let mut keywords = BTreeMap::from([("niter".to_string(), niter as f64)]);
        if let Some(nwalkers) = nwalkers {
            keywords.insert("nwalkers".to_string(), nwalkers as f64);
        }
        let config = self.fitter_config_for("ensemble_sampler", keywords);

        let start = self.registry.fitted_values();
        let outcome = self.fit_with(config, None, None);
        let restored = self.apply_vector(&start);
        let result = outcome?;
        restored?;
        Ok(result)
    }

    /// Fit every radial velocity group on its own comparisons
    ///
    /// Only the radial velocity of one group is fitted at a time. The fitted
    /// flags are restored afterwards, also when a fit fails.
    pub fn optimize_rv(&mut self, groups: Option<&[GroupId]>) -> Result<Vec<(GroupId, FitResult)>> {
        let groups = match groups {
            Some(groups) => groups.to_vec(),
            None => self.registry.defined_groups(None, RV),
        };

        let previous = self.registry.clear_fitted();
        let outcome = self.optimize_rv_groups(&groups);
        let restored = self.registry.restore_fitted(&previous);
        let results = outcome?;
        restored?;
        Ok(results)
    }

    fn optimize_rv_groups(&mut self, groups: &[GroupId]) -> Result<Vec<(GroupId, FitResult)>> {
        let mut results = Vec::with_capacity(groups.len());
        for &group in groups {
            let subset = self.engine.select_group(RV, group);
            if subset.is_empty() {
                warn!("No comparison uses radial velocity group {}", group);
                continue;
            }

            self.registry
                .update(None, RV, Some(group), &ParameterUpdate::fitted(true))?;
            let fit = self.run_fit(Some(&subset));
            self.registry
                .update(None, RV, Some(group), &ParameterUpdate::fitted(false))?;

            let fit = fit?;
            debug!("Radial velocity group {}: chi2 = {:.6}", group, fit.chi2);
            results.push((group, fit));
        }
        Ok(results)
    }

    /// Update matching parameters and refresh the comparisons
    ///
    /// # Returns
    ///
    /// The number of parameters updated.
    pub fn set_parameter(
        &mut self,
        component: Option<&str>,
        name: &str,
        group: Option<GroupId>,
        update: &ParameterUpdate,
    ) -> Result<usize> {
        let updated = self.registry.update(component, name, group, update)?;

        let changes_values = update.value.is_some() || update.vmin.is_some() || update.vmax.is_some();
        if changes_values && self.is_current() {
            let resynthesize: BTreeSet<String> = if definitions::is_directly_applied(name) {
                BTreeSet::new()
            } else {
                match component.filter(|c| *c != ALL_COMPONENTS) {
                    Some(c) => BTreeSet::from([c.to_string()]),
                    None => self.registry.components().iter().map(|c| c.to_string()).collect(),
                }
            };
            if !resynthesize.is_empty() {
                self.engine
                    .synthesize(&self.registry, &mut self.synthesizer, Some(&resynthesize))?;
            }
            self.engine.populate(&self.registry, None)?;
        }
        Ok(updated)
    }

    /// Narrow the bounds of matching parameters to `value ± error`
    ///
    /// Relative luminosities stay inside `[0, 1]` and rotational velocities
    /// stay non-negative.
    pub fn set_error(
        &mut self,
        component: Option<&str>,
        name: &str,
        group: Option<GroupId>,
        error: f64,
    ) -> Result<usize> {
        if !(error.is_finite() && error >= 0.0) {
            return Err(SpecFitError::Configuration(format!(
                "error of {} must be a non-negative number, got {}",
                name, error
            )));
        }

        let component = component.filter(|c| *c != ALL_COMPONENTS);
        let targets: Vec<(ParameterKey, f64)> = self
            .registry
            .iter()
            .filter(|p| p.name() == name)
            .filter(|p| component.map_or(true, |c| p.component() == c))
            .filter(|p| group.map_or(true, |g| p.group() == g))
            .map(|p| (p.key(), p.value()))
            .collect();
        if targets.is_empty() {
            return Err(SpecFitError::NotFound(format!(
                "no parameter {} matches component {} group {}",
                name,
                component.unwrap_or(ALL_COMPONENTS),
                group.map_or_else(|| "any".to_string(), |g| g.to_string())
            )));
        }

        for (key, value) in &targets {
            let (mut vmin, mut vmax) = (value - error, value + error);
            if name == LR {
                vmin = vmin.max(0.0);
                vmax = vmax.min(1.0);
            } else if name == VROT {
                vmin = vmin.max(0.0);
            }
            self.registry
                .set_bounds(&key.component, &key.name, key.group, vmin, vmax)?;
        }
        Ok(targets.len())
    }

    /// Delete one group of a parameter
    ///
    /// Refused while a region, an observed spectrum or a live comparison
    /// uses the group. Comparisons are set up again afterwards.
    pub fn remove_parameter(&mut self, component: &str, name: &str, group: GroupId) -> Result<Parameter> {
        let key = ParameterKey::new(component, name, group);
        if self.regions.references_group(component, name, group) {
            return Err(SpecFitError::Configuration(format!(
                "{} is used by a region",
                key
            )));
        }
        let observed = self.observations.iter().enumerate().any(|(index, spectrum)| {
            (spectrum.component == component || spectrum.component == ALL_COMPONENTS)
                && self
                    .observations
                    .resolved_groups(index)
                    .and_then(|groups| groups.get(name))
                    .map_or(false, |ids| ids.contains(&group))
        });
        if observed {
            return Err(SpecFitError::Configuration(format!(
                "{} is used by an observed spectrum",
                key
            )));
        }
        if self.engine.references_group(component, name, group) {
            return Err(SpecFitError::Configuration(format!(
                "{} is used by a comparison",
                key
            )));
        }

        let removed = self.registry.remove(component, name, group)?;
        debug!("Removed {}", key);
        if self.engine.state() != EngineState::Empty {
            self.setup()?;
        }
        Ok(removed)
    }

    /// Write the radial velocity of every observed spectrum
    ///
    /// One line per spectrum: HJD, filename and the radial velocity of each
    /// component (`nan` where a value does not apply).
    pub fn write_rvs<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let components: Vec<&str> = self
            .registry
            .components()
            .into_iter()
            .filter(|c| !self.registry.defined_groups(Some(*c), RV).is_empty())
            .collect();

        let mut out = BufWriter::new(File::create(path.as_ref())?);
        let header: Vec<String> = components.iter().map(|c| format!("rv_{}", c)).collect();
        writeln!(out, "# hjd filename {}", header.join(" "))?;

        for (index, spectrum) in self.observations.iter().enumerate() {
            let group = self
                .observations
                .resolved_groups(index)
                .and_then(|groups| groups.get(RV))
                .and_then(|ids| ids.first().copied());

            let mut line = vec![
                spectrum.hjd.map_or_else(|| "nan".to_string(), |hjd| format!("{:.6}", hjd)),
                spectrum.label(),
            ];
            for component in &components {
                let applies = spectrum.component == *component || spectrum.component == ALL_COMPONENTS;
                let value = group
                    .filter(|_| applies)
                    .and_then(|g| self.registry.get(component, RV, g).ok())
                    .map(|p| p.value());
                line.push(value.map_or_else(|| "nan".to_string(), |v| format!("{:.6}", v)));
            }
            writeln!(out, "{}", line.join(" "))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Save the session to a JSON document
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let session = SavedSession::capture(
            &self.registry,
            &self.regions,
            &self.observations,
            self.fitter.as_ref(),
            self.chi_square().ok(),
        );
        session.save_json(path.as_ref())?;
        info!("Saved session to {}", path.as_ref().display());
        Ok(())
    }

    /// Restore a saved session and set it up
    pub fn load<P: AsRef<Path>>(path: P, synthesizer: S, config: EngineConfig) -> Result<Self> {
        let session = SavedSession::load_json(path.as_ref())?;
        let registry = session.registry()?;
        let regions = session.regions(config.region_tolerance)?;
        let observations = session.observations()?;

        let mut orchestrator = Self::new(registry, synthesizer)
            .with_config(config)
            .with_regions(regions)
            .with_observations(observations);
        orchestrator.fitter = session.fitter;

        if !(orchestrator.regions.is_empty() && orchestrator.observations.is_empty()) {
            orchestrator.setup()?;
        }
        info!("Loaded session from {}", path.as_ref().display());
        Ok(orchestrator)
    }

    fn fitter_config_for(&self, name: &str, keywords: BTreeMap<String, f64>) -> FitterConfig {
        FitterConfig {
            backend: name.to_string(),
            keywords,
            iteration_log: self.config.effective_iteration_log().map(Path::to_path_buf),
            chain_file: self.config.chain_file.clone(),
            flush_every: self.config.flush_every,
            seed: self.config.seed,
        }
    }

    /// Run a backend on the current fitted parameters without accepting
    fn fit_with(
        &mut self,
        config: FitterConfig,
        init_step: Option<Array1<f64>>,
        subset: Option<&[usize]>,
    ) -> Result<FitResult> {
        self.ensure_current()?;

        let keys = self.registry.fitted_keys();
        let mut fitter = {
            let fitted = self.registry.fitted();
            let init_step = init_step.filter(|step| {
                let matches = step.len() == fitted.len();
                if !matches {
                    warn!(
                        "Initial step has {} entries for {} fitted parameters, using the default step",
                        step.len(),
                        fitted.len()
                    );
                }
                matches
            });
            Fitter::from_config(config, &fitted, init_step)?
        };
        let initial = fitter.initial_vector(&self.registry.fitted_values());

        let engine = &mut self.engine;
        let registry = &mut self.registry;
        let synthesizer = &mut self.synthesizer;
        let mut objective =
            |x: &Array1<f64>| -> Result<f64> { engine.compute_chi2(x, registry, synthesizer, subset) };
        let result = fitter.optimize(&mut objective, &initial)?;

        self.last_fit = Some((result.clone(), keys));
        Ok(result)
    }

    /// Scatter a vector and repopulate every comparison
    fn apply_vector(&mut self, vector: &Array1<f64>) -> Result<()> {
        self.ensure_current()?;
        self.registry.scatter(vector)?;
        let resynthesize = self.registry.components_needing_synthesis();
        if !resynthesize.is_empty() {
            self.engine
                .synthesize(&self.registry, &mut self.synthesizer, Some(&resynthesize))?;
        }
        self.engine.populate(&self.registry, None)
    }

    /// Synthesize and populate everything again after values changed
    fn refresh(&mut self) -> Result<()> {
        self.ensure_current()?;
        self.engine.synthesize(&self.registry, &mut self.synthesizer, None)?;
        self.engine.populate(&self.registry, None)
    }

    fn is_current(&self) -> bool {
        self.engine.state() != EngineState::Empty
            && !self
                .engine
                .is_stale(&self.registry, &self.regions, Some(&self.observations))
    }

    fn ensure_current(&self) -> Result<()> {
        if self.engine.state() == EngineState::Empty {
            return Err(SpecFitError::State(
                "comparisons are not set up".to_string(),
            ));
        }
        if self
            .engine
            .is_stale(&self.registry, &self.regions, Some(&self.observations))
        {
            return Err(SpecFitError::State(
                "parameters, regions or observations changed since setup".to_string(),
            ));
        }
        Ok(())
    }

    fn warn_uncovered_spectra(&self) {
        for spectrum in self.observations.iter() {
            let (smin, smax) = spectrum.bounds();
            let covered = self.regions.iter().any(|r| {
                smin <= r.wmin + EDGE_TOLERANCE && smax >= r.wmax - EDGE_TOLERANCE
            });
            if !covered {
                warn!(
                    "Observed spectrum {} ({}, {}) does not cover any region",
                    spectrum.label(),
                    smin,
                    smax
                );
            }
        }
    }

    /// Groups the observed spectra demand, per component
    ///
    /// Radial velocity groups always; in all-groups mode every parameter
    /// except the relative luminosity, which belongs to regions.
    fn observation_groups(&self) -> Result<GroupTable> {
        let all_groups = self.engine.mode() == EnumerationMode::AllGroups;
        let selected = |name: &str| if all_groups { name != LR } else { name == RV };

        for spectrum in self.observations.iter() {
            if spectrum.component != ALL_COMPONENTS && !self.registry.has_component(&spectrum.component) {
                return Err(SpecFitError::Configuration(format!(
                    "observed spectrum {} belongs to unknown component {}",
                    spectrum.label(),
                    spectrum.component
                )));
            }
        }

        let mut table = GroupTable::new();
        for component in self.registry.components() {
            let mut groups: BTreeMap<String, BTreeSet<GroupId>> = BTreeMap::new();
            for (index, spectrum) in self.observations.iter().enumerate() {
                if spectrum.component != component && spectrum.component != ALL_COMPONENTS {
                    continue;
                }
                let Some(resolved) = self.observations.resolved_groups(index) else {
                    continue;
                };
                for (name, ids) in resolved.iter().filter(|(name, _)| selected(name.as_str())) {
                    groups.entry(name.clone()).or_default().extend(ids.iter().copied());
                }
            }
            if !groups.is_empty() {
                table.insert(
                    component.to_string(),
                    groups
                        .into_iter()
                        .map(|(name, ids)| (name, ids.into_iter().collect()))
                        .collect(),
                );
            }
        }
        Ok(table)
    }

    /// Drop groups of observation-driven parameters that nothing uses
    fn prune_groups(&mut self, region_groups: &GroupTable, observation_groups: &GroupTable) -> Result<()> {
        for (component, names) in observation_groups {
            for (name, observed) in names {
                let mut used: BTreeSet<GroupId> = observed.iter().copied().collect();
                for owner in [component.as_str(), ALL_COMPONENTS] {
                    if let Some(ids) = region_groups.get(owner).and_then(|n| n.get(name)) {
                        used.extend(ids.iter().copied());
                    }
                }

                for group in self.registry.defined_groups(Some(component), name) {
                    let remaining = self.registry.defined_groups(Some(component), name).len();
                    if !used.contains(&group) && remaining > 1 {
                        self.registry.remove(component, name, group)?;
                        debug!("Dropped unused group {} of {}:{}", group, component, name);
                    }
                }
            }
        }
        Ok(())
    }
}
