//! Bootstrap resampling of the observed spectra.

use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Orchestrator;
use crate::error::{Result, SpecFitError};
use crate::observed::ObservationSet;
use crate::parameters::definitions::RV;
use crate::parameters::{GroupId, Parameter, ParameterKey, ParameterUpdate, ALL_COMPONENTS};
use crate::synthetic::Synthesizer;

/// Ranges of the random starting values, per component and parameter
///
/// A start is drawn from `(value - low, value + high)` and the bounds of the
/// refit become `(value - 2 low, value + 2 high)`, both clipped to the
/// parameter's own bounds. The component `"all"` applies to every component.
pub type BootstrapLimits = BTreeMap<String, BTreeMap<String, (f64, f64)>>;

/// Outcome of one bootstrap iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSample {
    pub iteration: usize,
    pub chi2: f64,
    /// Fitted parameters after the refit
    pub values: Vec<(ParameterKey, f64)>,
}

impl<S: Synthesizer> Orchestrator<S> {
    /// Replace the observations by a sample drawn with replacement
    ///
    /// Resampled spectrum `i` gets the radial velocity group `i`, seeded
    /// with value, bounds and fitted flag of its source spectrum's group.
    ///
    /// # Returns
    ///
    /// The number of comparisons after setting up again.
    pub fn draw_random_sample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<usize> {
        let n = self.observations.len();
        if n == 0 {
            return Err(SpecFitError::State(
                "there are no observed spectra to resample".to_string(),
            ));
        }

        let mut indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        indices.sort_unstable();

        let mut spectra = Vec::with_capacity(n);
        let mut seeds: Vec<(GroupId, Vec<Parameter>)> = Vec::with_capacity(n);
        for (group, &source) in indices.iter().enumerate() {
            let Some(spectrum) = self.observations.spectrum(source) else {
                continue;
            };
            let source_group = self
                .observations
                .resolved_groups(source)
                .and_then(|groups| groups.get(RV))
                .and_then(|ids| ids.first().copied());

            let rvs: Vec<Parameter> = self
                .registry
                .components()
                .into_iter()
                .filter(|c| spectrum.component == *c || spectrum.component == ALL_COMPONENTS)
                .filter_map(|c| source_group.and_then(|g| self.registry.get(c, RV, g).ok()))
                .cloned()
                .collect();

            let mut spectrum = spectrum.clone();
            spectrum.groups.insert(RV.to_string(), vec![group]);
            spectra.push(spectrum);
            seeds.push((group, rvs));
        }

        self.observations = ObservationSet::from_spectra(spectra)?;
        self.engine.invalidate();

        for (group, rvs) in seeds {
            for source in rvs {
                self.registry.set_groups(source.component(), RV, &[group])?;
                let update = ParameterUpdate {
                    value: Some(source.value()),
                    vmin: Some(source.vmin()),
                    vmax: Some(source.vmax()),
                    fitted: Some(source.fitted()),
                };
                self.registry
                    .update(Some(source.component()), RV, Some(group), &update)?;
            }
        }

        info!("Resampled observations: {:?}", indices);
        self.setup()
    }

    /// Estimate uncertainties by refitting resampled observations
    ///
    /// Every iteration starts from the current session, draws a random
    /// sample, randomizes the starting values inside `limits` and refits.
    /// With `decouple_rv` the radial velocities are fitted separately from
    /// the remaining parameters, alternating `sub_niter` times. With an
    /// `output_prefix` the session is saved before and after every refit as
    /// `<prefix>.initial.<iter>.json` and `<prefix>.<iter>.json`.
    ///
    /// The session is restored when the iterations end, also on error.
    pub fn run_bootstrap<R: Rng + ?Sized>(
        &mut self,
        limits: &BootstrapLimits,
        niter: usize,
        decouple_rv: bool,
        sub_niter: usize,
        output_prefix: Option<&str>,
        rng: &mut R,
    ) -> Result<Vec<BootstrapSample>> {
        self.check_limits(limits)?;

        let registry = self.registry.clone();
        let observations = self.observations.clone();

        let mut samples = Vec::with_capacity(niter);
        let mut outcome = Ok(());
        for iteration in 0..niter {
            self.registry = registry.clone();
            self.observations = observations.clone();
            self.engine.invalidate();

            match self.bootstrap_iteration(iteration, limits, decouple_rv, sub_niter, output_prefix, rng) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        self.registry = registry;
        self.observations = observations;
        self.engine.invalidate();
        let restored = self.setup();

        outcome?;
        restored?;
        Ok(samples)
    }

    fn bootstrap_iteration<R: Rng + ?Sized>(
        &mut self,
        iteration: usize,
        limits: &BootstrapLimits,
        decouple_rv: bool,
        sub_niter: usize,
        output_prefix: Option<&str>,
        rng: &mut R,
    ) -> Result<BootstrapSample> {
        self.draw_random_sample(rng)?;
        self.randomize_start(limits, rng)?;
        if let Some(prefix) = output_prefix {
            self.save(format!("{}.initial.{:03}.json", prefix, iteration))?;
        }

        if decouple_rv {
            for _ in 0..sub_niter.max(1) {
                self.fit_decoupled()?;
            }
        } else {
            self.run_fit(None)?;
        }

        let sample = BootstrapSample {
            iteration,
            chi2: self.current_chi2()?,
            values: self
                .registry
                .fitted()
                .into_iter()
                .map(|p| (p.key(), p.value()))
                .collect(),
        };
        info!("Bootstrap iteration {}: chi2 = {:.6}", iteration, sample.chi2);

        if let Some(prefix) = output_prefix {
            self.save(format!("{}.{:03}.json", prefix, iteration))?;
        }
        Ok(sample)
    }

    fn check_limits(&self, limits: &BootstrapLimits) -> Result<()> {
        for (component, names) in limits {
            if component != ALL_COMPONENTS && !self.registry.has_component(component) {
                return Err(SpecFitError::Configuration(format!(
                    "bootstrap limits refer to unknown component {}",
                    component
                )));
            }
            for (name, &(low, high)) in names {
                let valid = |x: f64| x.is_finite() && x >= 0.0;
                if !(valid(low) && valid(high)) {
                    return Err(SpecFitError::Configuration(format!(
                        "bootstrap limits of {}:{} must be non-negative, got ({}, {})",
                        component, name, low, high
                    )));
                }
            }
        }
        Ok(())
    }

    /// Draw starting values around the current ones and narrow the bounds
    fn randomize_start<R: Rng + ?Sized>(&mut self, limits: &BootstrapLimits, rng: &mut R) -> Result<()> {
        for (component, names) in limits {
            for (name, &(low, high)) in names {
                let targets: Vec<ParameterKey> = self
                    .registry
                    .iter()
                    .filter(|p| p.name() == name)
                    .filter(|p| component == ALL_COMPONENTS || p.component() == component)
                    .map(|p| p.key())
                    .collect();
                if targets.is_empty() {
                    warn!("No parameter {} of {} to randomize", name, component);
                }

                for key in targets {
                    let parameter = self.registry.get(&key.component, &key.name, key.group)?;
                    let (value, vmin, vmax) = (parameter.value(), parameter.vmin(), parameter.vmax());

                    let llim = (value - low).max(vmin);
                    let ulim = (value + high).min(vmax);
                    let start = if llim < ulim { rng.gen_range(llim..ulim) } else { value };

                    let update = ParameterUpdate {
                        value: Some(start),
                        vmin: Some(vmin.max(value - 2.0 * low)),
                        vmax: Some(vmax.min(value + 2.0 * high)),
                        fitted: None,
                    };
                    self.registry
                        .update(Some(&key.component), &key.name, Some(key.group), &update)?;
                }
            }
        }
        self.refresh()
    }

    /// Fit everything except the radial velocities, then each velocity group
    fn fit_decoupled(&mut self) -> Result<()> {
        let keys = self.registry.fitted_keys();
        let (rvs, others): (Vec<ParameterKey>, Vec<ParameterKey>) =
            keys.iter().cloned().partition(|k| k.name == RV);

        let outcome = self.fit_decoupled_steps(&rvs, &others);
        let restored = self.registry.restore_fitted(&keys);
        outcome?;
        restored
    }

    fn fit_decoupled_steps(&mut self, rvs: &[ParameterKey], others: &[ParameterKey]) -> Result<()> {
        if !others.is_empty() {
            self.registry.restore_fitted(others)?;
            self.run_fit(None)?;
        }

        let groups: Vec<GroupId> = rvs
            .iter()
            .map(|k| k.group)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !groups.is_empty() {
            self.optimize_rv(Some(&groups))?;
        }
        Ok(())
    }
}
