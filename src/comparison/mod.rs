//! # Comparison Engine
//!
//! Enumerates the comparisons between model and observations and evaluates
//! the chi-square objective.
//!
//! The engine moves through three states:
//!
//! - **Empty**: nothing has been enumerated.
//! - **Ready**: comparisons exist for every region, group context and
//!   matching observation (or a synthetic placeholder without observations).
//! - **Populated**: every comparison carries synthetic spectra and a chi2.
//!
//! The engine remembers the generation counters of the parameter registry,
//! the observation set and the region set it was built from. Any later change
//! of their topology makes it stale, and evaluating a stale engine is a state
//! error instead of a silently wrong chi-square.
//!
//! Populating a subset of the comparisons leaves the others computed from
//! older parameter values. Those are marked outdated and summing over them is
//! a state error until they are populated again.

pub mod record;

use crate::error::{Result, SpecFitError};
use crate::observed::ObservationSet;
use crate::parameters::definitions::{self, RV};
use crate::parameters::{GroupId, ParameterRegistry};
use crate::regions::{Region, RegionSet};
use crate::synthetic::{ParameterValues, SyntheticSpectrum, Synthesizer, Wavelengths};
use log::{debug, info};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use record::{Comparison, ComponentModel, ObservedWindow};

/// How group contexts are enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationMode {
    /// Regions x radial velocity groups x observations with that group
    #[default]
    RadialVelocity,

    /// Regions x every combination of defined groups x matching observations
    AllGroups,
}

/// Lifecycle of the comparison list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Empty,
    Ready,
    Populated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Topology {
    registry: u64,
    regions: u64,
    observations: Option<u64>,
}

impl Topology {
    fn of(registry: &ParameterRegistry, regions: &RegionSet, observations: Option<&ObservationSet>) -> Self {
        Self {
            registry: registry.topology_generation(),
            regions: regions.generation(),
            observations: observations.map(|o| o.generation()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SyntheticKey {
    region: String,
    component: String,
    groups: Vec<(String, GroupId)>,
}

impl SyntheticKey {
    fn new(comparison: &Comparison, model: &ComponentModel) -> Self {
        Self {
            region: comparison.region.clone(),
            component: model.component.clone(),
            groups: model
                .groups
                .iter()
                .filter(|(name, _)| !definitions::is_directly_applied(name))
                .map(|(name, group)| (name.clone(), *group))
                .collect(),
        }
    }
}

/// Builds and evaluates the comparisons
#[derive(Debug)]
pub struct ComparisonEngine {
    mode: EnumerationMode,
    state: EngineState,
    comparisons: Vec<Comparison>,
    synthetics: BTreeMap<SyntheticKey, Box<dyn SyntheticSpectrum>>,
    topology: Option<Topology>,
    outdated: BTreeSet<usize>,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new(EnumerationMode::default())
    }
}

impl ComparisonEngine {
    pub fn new(mode: EnumerationMode) -> Self {
        Self {
            mode,
            state: EngineState::Empty,
            comparisons: Vec::new(),
            synthetics: BTreeMap::new(),
            topology: None,
            outdated: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> EnumerationMode {
        self.mode
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn comparisons(&self) -> &[Comparison] {
        &self.comparisons
    }

    pub fn len(&self) -> usize {
        self.comparisons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparisons.is_empty()
    }

    /// Drop every comparison and cached synthetic spectrum
    pub fn invalidate(&mut self) {
        self.comparisons.clear();
        self.synthetics.clear();
        self.topology = None;
        self.outdated.clear();
        self.state = EngineState::Empty;
    }

    /// Comparisons whose chi2 predates the last population of a subset
    pub fn outdated(&self) -> &BTreeSet<usize> {
        &self.outdated
    }

    /// Whether the engine was built from a different topology
    pub fn is_stale(
        &self,
        registry: &ParameterRegistry,
        regions: &RegionSet,
        observations: Option<&ObservationSet>,
    ) -> bool {
        self.topology != Some(Topology::of(registry, regions, observations))
    }

    /// Enumerate the comparisons
    ///
    /// # Returns
    ///
    /// The number of comparisons created.
    pub fn ready(
        &mut self,
        registry: &ParameterRegistry,
        regions: &RegionSet,
        observations: Option<&ObservationSet>,
    ) -> Result<usize> {
        self.invalidate();
        let topology = Topology::of(registry, regions, observations);
        if registry.is_empty() {
            return Err(SpecFitError::State(
                "no components are registered".to_string(),
            ));
        }

        let observations = observations.filter(|o| !o.is_empty());
        let mut comparisons = Vec::new();
        for region in regions.iter() {
            let contexts = match self.mode {
                EnumerationMode::RadialVelocity => rv_contexts(registry, region),
                EnumerationMode::AllGroups => all_group_contexts(registry, region),
            };

            for context in contexts {
                let matches = match observations {
                    Some(set) => {
                        let mut query = set.query().covers(region.wmin, region.wmax);
                        for (name, group) in context.iter().filter(|(name, _)| self.queried(name)) {
                            query = query.group(name, *group);
                        }
                        if self.mode == EnumerationMode::AllGroups {
                            query = query.permissive();
                        }
                        query.indices()?.into_iter().map(Some).collect()
                    }
                    None => vec![None],
                };

                for index in matches {
                    comparisons.push(build_comparison(registry, region, &context, observations, index)?);
                }
            }
        }

        info!(
            "Created {} comparisons over {} regions",
            comparisons.len(),
            regions.len()
        );
        self.comparisons = comparisons;
        self.topology = Some(topology);
        self.state = EngineState::Ready;
        Ok(self.comparisons.len())
    }

    /// Interpolate synthetic spectra
    ///
    /// With `components == None` every spectrum is synthesized, otherwise only
    /// those of the listed components.
    pub fn synthesize<S>(
        &mut self,
        registry: &ParameterRegistry,
        synthesizer: &mut S,
        components: Option<&BTreeSet<String>>,
    ) -> Result<()>
    where
        S: Synthesizer + ?Sized,
    {
        self.ensure_built()?;

        let mut needed: BTreeMap<SyntheticKey, (f64, f64)> = BTreeMap::new();
        for comparison in &self.comparisons {
            for model in &comparison.components {
                if components.map_or(true, |c| c.contains(&model.component)) {
                    needed.insert(
                        SyntheticKey::new(comparison, model),
                        (comparison.wmin, comparison.wmax),
                    );
                }
            }
        }

        for (key, (wmin, wmax)) in needed {
            let groups: BTreeMap<String, GroupId> = key.groups.iter().cloned().collect();
            let grid: ParameterValues = registry
                .parameters_for_groups(&key.component, &groups)?
                .into_iter()
                .filter(|(name, _)| !definitions::is_directly_applied(name))
                .collect();

            debug!(
                "Synthesizing {} in region {} with {:?}",
                key.component, key.region, grid
            );
            let synthetic = synthesizer.synthesize(&key.component, &grid, wmin, wmax)?;
            self.synthetics.insert(key, synthetic);
        }
        Ok(())
    }

    /// Compute synthetic spectra and chi-squares of the comparisons
    ///
    /// `subset` restricts the work to the listed comparison indices; every
    /// other comparison is then outdated.
    pub fn populate(&mut self, registry: &ParameterRegistry, subset: Option<&[usize]>) -> Result<()> {
        self.ensure_built()?;

        let indices = self.indices(subset)?;
        let mut outdated: BTreeSet<usize> = match subset {
            Some(_) => (0..self.comparisons.len()).collect(),
            None => BTreeSet::new(),
        };
        for &index in &indices {
            outdated.remove(&index);
        }

        for index in indices {
            let comparison = &self.comparisons[index];
            let mut synthetics = Vec::with_capacity(comparison.components.len());
            let mut values = Vec::with_capacity(comparison.components.len());

            for model in &comparison.components {
                let key = SyntheticKey::new(comparison, model);
                let synthetic = self.synthetics.get(&key).ok_or_else(|| {
                    SpecFitError::State(format!(
                        "no synthetic spectrum of {} for region {}",
                        model.component, comparison.region
                    ))
                })?;

                let snapshot = registry.parameters_for_groups(&model.component, &model.groups)?;
                let direct: ParameterValues = snapshot
                    .iter()
                    .filter(|(name, _)| definitions::is_directly_applied(name))
                    .map(|(name, value)| (name.clone(), *value))
                    .collect();

                let intens = match &comparison.observed {
                    Some(observed) => synthetic.spectrum(
                        &direct,
                        Wavelengths::Vector(&observed.wave),
                        observed.korel,
                        observed.fwhm,
                    )?,
                    None => synthetic.spectrum(
                        &direct,
                        Wavelengths::Bounds(comparison.wmin, comparison.wmax),
                        false,
                        0.0,
                    )?,
                };
                synthetics.push(intens);
                values.push(snapshot);
            }

            let comparison = &mut self.comparisons[index];
            for ((model, synthetic), snapshot) in comparison
                .components
                .iter_mut()
                .zip(synthetics)
                .zip(values)
            {
                model.synthetic = Some(synthetic);
                model.values = snapshot;
            }

            let chi2 = match &comparison.observed {
                Some(observed) => Comparison::evaluate(observed, &comparison.model()?)?,
                None => None,
            };
            comparison.chi2 = chi2;
        }

        self.outdated = outdated;
        self.state = EngineState::Populated;
        Ok(())
    }

    /// Evaluate the objective for an optimizer vector
    ///
    /// The vector is scattered into the fitted parameters, components with
    /// a fitted grid parameter are synthesized again, the comparisons are
    /// populated and the chi-squares summed.
    pub fn compute_chi2<S>(
        &mut self,
        vector: &Array1<f64>,
        registry: &mut ParameterRegistry,
        synthesizer: &mut S,
        subset: Option<&[usize]>,
    ) -> Result<f64>
    where
        S: Synthesizer + ?Sized,
    {
        self.ensure_built()?;
        if self.topology.map(|t| t.registry) != Some(registry.topology_generation()) {
            return Err(SpecFitError::State(
                "parameter groups changed since the comparisons were built".to_string(),
            ));
        }

        registry.scatter(vector)?;
        let resynthesize = registry.components_needing_synthesis();
        if !resynthesize.is_empty() {
            self.synthesize(registry, synthesizer, Some(&resynthesize))?;
        }
        self.populate(registry, subset)?;
        self.total_chi2(subset)
    }

    /// Sum of the chi-squares of the (selected) comparisons
    pub fn total_chi2(&self, subset: Option<&[usize]>) -> Result<f64> {
        if self.state != EngineState::Populated {
            return Err(SpecFitError::State(
                "comparisons are not populated".to_string(),
            ));
        }

        let mut chi2 = 0.0;
        for index in self.indices(subset)? {
            self.ensure_up_to_date(index)?;
            chi2 += self.comparisons[index].chi2()?;
        }
        Ok(chi2)
    }

    /// Chi-square of every comparison, in enumeration order
    pub fn chi2_by_comparison(&self) -> Result<Vec<f64>> {
        (0..self.comparisons.len())
            .map(|i| {
                self.ensure_up_to_date(i)?;
                self.comparisons[i].chi2()
            })
            .collect()
    }

    /// Observed pixels minus the number of fitted parameters
    pub fn degrees_of_freedom(&self, fitted: usize, subset: Option<&[usize]>) -> Result<i64> {
        let pixels: usize = self
            .indices(subset)?
            .into_iter()
            .map(|i| self.comparisons[i].npixels())
            .sum();
        Ok(pixels as i64 - fitted as i64)
    }

    /// Indices of the comparisons satisfying `predicate`
    pub fn select<F>(&self, predicate: F) -> Vec<usize>
    where
        F: Fn(&Comparison) -> bool,
    {
        self.comparisons
            .iter()
            .enumerate()
            .filter(|(_, c)| predicate(c))
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices of the comparisons enumerated for one group of `name`
    pub fn select_group(&self, name: &str, group: GroupId) -> Vec<usize> {
        self.select(|c| {
            c.groups.get(name) == Some(&group)
                || c.components.iter().any(|m| m.groups.get(name) == Some(&group))
        })
    }

    /// Indices of the comparisons of one region
    pub fn select_region(&self, region: &str) -> Vec<usize> {
        self.select(|c| c.region == region)
    }

    /// Whether a live comparison uses `group` of `name` for `component`
    pub fn references_group(&self, component: &str, name: &str, group: GroupId) -> bool {
        self.comparisons.iter().any(|c| {
            c.components
                .iter()
                .any(|m| m.component == component && m.groups.get(name) == Some(&group))
        })
    }

    fn queried(&self, name: &str) -> bool {
        match self.mode {
            EnumerationMode::RadialVelocity => name == RV,
            EnumerationMode::AllGroups => true,
        }
    }

    fn ensure_up_to_date(&self, index: usize) -> Result<()> {
        if self.outdated.contains(&index) {
            return Err(SpecFitError::State(format!(
                "comparison #{} predates the last parameter values, populate it again",
                index
            )));
        }
        Ok(())
    }

    fn ensure_built(&self) -> Result<()> {
        if self.state == EngineState::Empty {
            return Err(SpecFitError::State(
                "comparisons have not been readied".to_string(),
            ));
        }
        Ok(())
    }

    fn indices(&self, subset: Option<&[usize]>) -> Result<Vec<usize>> {
        match subset {
            None => Ok((0..self.comparisons.len()).collect()),
            Some(indices) => {
                if let Some(bad) = indices.iter().find(|&&i| i >= self.comparisons.len()) {
                    return Err(SpecFitError::NotFound(format!("comparison #{}", bad)));
                }
                Ok(indices.to_vec())
            }
        }
    }
}

impl fmt::Display for ComparisonEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Comparisons ({:?}, {:?}):", self.mode, self.state)?;
        for (i, comparison) in self.comparisons.iter().enumerate() {
            writeln!(f, "{:4}: {}", i, comparison)?;
        }
        Ok(())
    }
}

/// Region groups of the first entry, which the region's components share
fn region_context(region: &Region) -> BTreeMap<String, GroupId> {
    region
        .entries
        .first()
        .map(|e| e.effective_groups())
        .unwrap_or_default()
}

fn rv_contexts(registry: &ParameterRegistry, region: &Region) -> Vec<BTreeMap<String, GroupId>> {
    let base = region_context(region);
    let rv_groups = registry.defined_groups(None, RV);
    if rv_groups.is_empty() {
        return vec![base];
    }
    rv_groups
        .into_iter()
        .map(|rv| {
            let mut context = base.clone();
            context.insert(RV.to_string(), rv);
            context
        })
        .collect()
}

/// Cartesian product of the defined groups of every parameter not pinned by the region
fn all_group_contexts(registry: &ParameterRegistry, region: &Region) -> Vec<BTreeMap<String, GroupId>> {
    let base = region_context(region);
    let mut contexts = vec![base.clone()];

    for name in registry.parameter_names() {
        if base.contains_key(&name) {
            continue;
        }
        let groups = registry.defined_groups(None, &name);
        let (name, groups) = (&name, &groups);
        contexts = contexts
            .into_iter()
            .flat_map(|context| {
                groups.iter().map(move |group| {
                    let mut next = context.clone();
                    next.insert(name.clone(), *group);
                    next
                })
            })
            .collect();
    }
    contexts
}

fn build_comparison(
    registry: &ParameterRegistry,
    region: &Region,
    context: &BTreeMap<String, GroupId>,
    observations: Option<&ObservationSet>,
    index: Option<usize>,
) -> Result<Comparison> {
    let observed = match (observations, index) {
        (Some(set), Some(index)) => {
            let spectrum = set
                .spectrum(index)
                .ok_or_else(|| SpecFitError::NotFound(format!("observed spectrum #{}", index)))?;
            let (wave, intens, error) = spectrum.get_spectrum(region.wmin, region.wmax)?;
            Some((
                spectrum.component.clone(),
                ObservedWindow {
                    index,
                    label: spectrum.label(),
                    wave,
                    intens,
                    error,
                    korel: spectrum.korel,
                    fwhm: spectrum.instrumental_width,
                },
            ))
        }
        _ => None,
    };

    let components: Vec<String> = match &observed {
        Some((component, _)) if registry.has_component(component) => vec![component.clone()],
        Some((component, window)) if component != crate::parameters::ALL_COMPONENTS => {
            return Err(SpecFitError::Configuration(format!(
                "observed spectrum {} belongs to unknown component {}",
                window.label, component
            )))
        }
        _ => registry.components().iter().map(|c| c.to_string()).collect(),
    };

    let mut models = Vec::with_capacity(components.len());
    for component in &components {
        let mut requested = region.groups_for(component).unwrap_or_else(|| context.clone());
        for (name, group) in context {
            if name == RV || !requested.contains_key(name) {
                requested.insert(name.clone(), *group);
            }
        }
        let groups = registry.resolve_groups(component, &requested)?;
        models.push(ComponentModel::new(component, groups));
    }

    debug!(
        "Comparison for region {} groups {:?} observed {:?}",
        region.identification,
        context,
        observed.as_ref().map(|(_, w)| w.label.as_str())
    );

    Ok(Comparison {
        region: region.identification.clone(),
        wmin: region.wmin,
        wmax: region.wmax,
        groups: context.clone(),
        observed: observed.map(|(_, window)| window),
        components: models,
        chi2: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observed::ObservedSpectrum;
    use approx::assert_relative_eq;
    use ndarray::Array1;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Flat continuum scaled by `lr` and shifted by `teff / 1e5`
    #[derive(Debug)]
    struct Flat {
        level: f64,
    }

    impl SyntheticSpectrum for Flat {
        fn spectrum(
            &self,
            direct: &ParameterValues,
            wavelengths: Wavelengths<'_>,
            _korel: bool,
            _fwhm: f64,
        ) -> Result<Array1<f64>> {
            let n = match wavelengths {
                Wavelengths::Vector(wave) => wave.len(),
                Wavelengths::Bounds(wmin, wmax) => (wmax - wmin).round() as usize + 1,
            };
            let lr = direct.get("lr").copied().unwrap_or(1.0);
            let rv = direct.get("rv").copied().unwrap_or(0.0);
            Ok(Array1::from_elem(n, lr * (self.level + rv * 1e-3)))
        }
    }

    struct FlatSynthesizer {
        calls: Rc<Cell<usize>>,
    }

    impl Synthesizer for FlatSynthesizer {
        fn synthesize(
            &mut self,
            _component: &str,
            parameters: &ParameterValues,
            _wmin: f64,
            _wmax: f64,
        ) -> Result<Box<dyn SyntheticSpectrum>> {
            self.calls.set(self.calls.get() + 1);
            Ok(Box::new(Flat {
                level: parameters.get("teff").copied().unwrap_or(0.0) / 1e5,
            }))
        }
    }

    fn setup(error: Option<f64>) -> (ParameterRegistry, RegionSet, ObservationSet) {
        let mut registry = ParameterRegistry::new();
        let values = BTreeMap::from([("teff".to_string(), 20000.0), ("lr".to_string(), 0.5)]);
        registry.add_component("primary", &values).unwrap();
        registry.add_component("secondary", &values).unwrap();
        registry.set_groups("all", "rv", &[0, 1]).unwrap();

        let mut regions = RegionSet::new();
        regions.add_region("all", None, 4300.0, 4380.0, BTreeMap::new()).unwrap();
        regions.add_region("all", None, 4460.0, 4500.0, BTreeMap::new()).unwrap();
        registry.set_groups("all", "lr", &[0, 1]).unwrap();

        let mut observations = ObservationSet::new();
        for name in ["a.dat", "b.dat"] {
            let wave = Array1::linspace(4250.0, 4550.0, 301);
            let mut spectrum = ObservedSpectrum::new(wave, Array1::from_elem(301, 0.5))
                .unwrap()
                .with_filename(name);
            if let Some(error) = error {
                spectrum.set_global_error(error).unwrap();
            }
            observations.add(spectrum).unwrap();
        }
        (registry, regions, observations)
    }

    #[test]
    fn test_ready_enumerates_regions_and_rv_groups() {
        let (registry, regions, observations) = setup(Some(0.01));
        let mut engine = ComparisonEngine::default();
        assert_eq!(engine.state(), EngineState::Empty);

        let count = engine.ready(&registry, &regions, Some(&observations)).unwrap();
        assert_eq!(count, 4);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.select_group("rv", 1).len(), 2);
        assert_eq!(engine.select_region("region01").len(), 2);

        let comparison = &engine.comparisons()[2];
        assert_eq!(comparison.region, "region01");
        assert_eq!(comparison.components[0].groups["lr"], 1);
        assert!(matches!(
            comparison.synthetic("primary"),
            Err(SpecFitError::State(_))
        ));
    }

    #[test]
    fn test_placeholder_without_observations() {
        let (mut registry, regions, _) = setup(None);
        registry.remove("primary", "rv", 1).unwrap();
        registry.remove("secondary", "rv", 1).unwrap();

        let mut engine = ComparisonEngine::default();
        assert_eq!(engine.ready(&registry, &regions, None).unwrap(), 2);

        let calls = Rc::new(Cell::new(0));
        let mut synthesizer = FlatSynthesizer { calls: calls.clone() };
        engine.synthesize(&registry, &mut synthesizer, None).unwrap();
        engine.populate(&registry, None).unwrap();

        // 2 regions x 2 components
        assert_eq!(calls.get(), 4);
        assert_eq!(engine.comparisons()[0].model().unwrap().len(), 81);
        assert!(matches!(engine.total_chi2(None), Err(SpecFitError::State(_))));
    }

    #[test]
    fn test_chi2_requires_error_bars() {
        let (mut registry, regions, observations) = setup(None);
        let mut engine = ComparisonEngine::default();
        engine.ready(&registry, &regions, Some(&observations)).unwrap();

        let mut synthesizer = FlatSynthesizer { calls: Rc::new(Cell::new(0)) };
        engine.synthesize(&registry, &mut synthesizer, None).unwrap();

        let vector = registry.fitted_values();
        let result = engine.compute_chi2(&vector, &mut registry, &mut synthesizer, None);
        assert!(matches!(result, Err(SpecFitError::State(_))));
    }

    #[test]
    fn test_compute_chi2_is_idempotent() {
        let (mut registry, regions, observations) = setup(Some(0.01));
        registry.set_fitted("primary", "teff", 0, true).unwrap();
        registry.set_fitted("secondary", "rv", 1, true).unwrap();

        let mut engine = ComparisonEngine::default();
        engine.ready(&registry, &regions, Some(&observations)).unwrap();
        let calls = Rc::new(Cell::new(0));
        let mut synthesizer = FlatSynthesizer { calls: calls.clone() };
        engine.synthesize(&registry, &mut synthesizer, None).unwrap();

        let vector = ndarray::array![25000.0, 10.0];
        let first = engine
            .compute_chi2(&vector, &mut registry, &mut synthesizer, None)
            .unwrap();
        let second = engine
            .compute_chi2(&vector, &mut registry, &mut synthesizer, None)
            .unwrap();
        assert_relative_eq!(first, second);
        assert!(first > 0.0);

        // Only the primary needs a new interpolation: 2 regions per call
        assert_eq!(calls.get(), 4 + 2 + 2);
        assert_eq!(engine.chi2_by_comparison().unwrap().len(), 4);
        assert_eq!(engine.degrees_of_freedom(2, None).unwrap(), 2 * 81 + 2 * 41 - 2);
    }

    #[test]
    fn test_subset_population_outdates_the_rest() {
        let (mut registry, regions, observations) = setup(Some(0.01));
        registry.set_fitted("primary", "rv", 0, true).unwrap();

        let mut engine = ComparisonEngine::default();
        engine.ready(&registry, &regions, Some(&observations)).unwrap();
        let mut synthesizer = FlatSynthesizer { calls: Rc::new(Cell::new(0)) };
        engine.synthesize(&registry, &mut synthesizer, None).unwrap();
        engine.populate(&registry, None).unwrap();
        assert!(engine.outdated().is_empty());

        let subset = engine.select_group("rv", 0);
        let vector = ndarray::array![50.0];
        let partial = engine
            .compute_chi2(&vector, &mut registry, &mut synthesizer, Some(&subset))
            .unwrap();
        assert_eq!(engine.outdated().len(), 2);
        assert_relative_eq!(engine.total_chi2(Some(&subset)).unwrap(), partial);
        assert!(matches!(engine.total_chi2(None), Err(SpecFitError::State(_))));
        assert!(matches!(engine.chi2_by_comparison(), Err(SpecFitError::State(_))));

        let full = engine
            .compute_chi2(&vector, &mut registry, &mut synthesizer, None)
            .unwrap();
        assert!(engine.outdated().is_empty());
        assert_relative_eq!(engine.total_chi2(None).unwrap(), full);
    }

    #[test]
    fn test_exact_model_has_zero_chi2() {
        let (mut registry, regions, observations) = setup(Some(0.01));
        // 0.5 * 0.2 * 2 components = 0.2 != 0.5, so make the model match
        registry.set_value("primary", "lr", 0, 1.0).unwrap();
        registry.set_value("primary", "lr", 1, 1.0).unwrap();
        registry.set_value("secondary", "lr", 0, 1.0).unwrap();
        registry.set_value("secondary", "lr", 1, 1.0).unwrap();
        registry.set_value("primary", "teff", 0, 25000.0).unwrap();
        registry.set_value("secondary", "teff", 0, 25000.0).unwrap();

        let mut engine = ComparisonEngine::default();
        engine.ready(&registry, &regions, Some(&observations)).unwrap();
        let mut synthesizer = FlatSynthesizer { calls: Rc::new(Cell::new(0)) };
        engine.synthesize(&registry, &mut synthesizer, None).unwrap();
        engine.populate(&registry, None).unwrap();

        assert_relative_eq!(engine.total_chi2(None).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_stale_engine_is_rejected() {
        let (mut registry, regions, observations) = setup(Some(0.01));
        let mut engine = ComparisonEngine::default();
        engine.ready(&registry, &regions, Some(&observations)).unwrap();
        assert!(!engine.is_stale(&registry, &regions, Some(&observations)));

        registry
            .clone_parameter("primary", "teff", 0, 3, &Default::default())
            .unwrap();
        assert!(engine.is_stale(&registry, &regions, Some(&observations)));

        let mut synthesizer = FlatSynthesizer { calls: Rc::new(Cell::new(0)) };
        let vector = registry.fitted_values();
        let result = engine.compute_chi2(&vector, &mut registry, &mut synthesizer, None);
        assert!(matches!(result, Err(SpecFitError::State(_))));

        engine.invalidate();
        assert!(matches!(
            engine.populate(&registry, None),
            Err(SpecFitError::State(_))
        ));
    }

    #[test]
    fn test_all_groups_mode() {
        let (mut registry, regions, mut observations) = setup(Some(0.01));
        registry.set_groups("all", "teff", &[0, 1]).unwrap();
        observations
            .set_groups("a.dat", BTreeMap::from([("teff".to_string(), vec![0])]))
            .unwrap();
        observations
            .set_groups("b.dat", BTreeMap::from([("teff".to_string(), vec![1])]))
            .unwrap();

        let mut engine = ComparisonEngine::new(EnumerationMode::AllGroups);
        // per region: rv x teff contexts, each matched by exactly one spectrum
        let count = engine.ready(&registry, &regions, Some(&observations)).unwrap();
        assert_eq!(count, 4);
        for comparison in engine.comparisons() {
            assert_eq!(comparison.groups["rv"], comparison.groups["teff"]);
        }
    }
}
