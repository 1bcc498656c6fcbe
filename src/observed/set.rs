//! Collection of observed spectra with derived group indices.

use crate::error::{Result, SpecFitError};
use crate::observed::spectrum::{ObservedSpectrum, EDGE_TOLERANCE};
use crate::parameters::definitions::RV;
use crate::parameters::{GroupId, ALL_COMPONENTS};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Groups of one spectrum, keyed by parameter name.
pub type GroupAssignment = BTreeMap<String, Vec<GroupId>>;

/// Observed spectra plus the group assignment resolved for each of them
#[derive(Debug, Clone, Default)]
pub struct ObservationSet {
    spectra: Vec<ObservedSpectrum>,

    /// Explicit and automatic groups of each spectrum, parallel to `spectra`
    resolved: Vec<GroupAssignment>,

    generation: u64,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from spectra in the given order
    pub fn from_spectra<I>(spectra: I) -> Result<Self>
    where
        I: IntoIterator<Item = ObservedSpectrum>,
    {
        let mut set = Self::new();
        for spectrum in spectra {
            spectrum.check_korel()?;
            set.spectra.push(spectrum);
        }
        set.changed();
        Ok(set)
    }

    /// Append a spectrum and recompute the group assignment
    pub fn add(&mut self, spectrum: ObservedSpectrum) -> Result<()> {
        spectrum.check_korel()?;
        debug!("Adding observed spectrum {}", spectrum.label());
        self.spectra.push(spectrum);
        self.changed();
        Ok(())
    }

    /// Append a spectrum with explicit groups
    pub fn add_with_groups(&mut self, mut spectrum: ObservedSpectrum, groups: GroupAssignment) -> Result<()> {
        for (name, ids) in groups {
            spectrum.groups.insert(name.to_lowercase(), ids);
        }
        self.add(spectrum)
    }

    /// Remove the spectrum read from `filename`
    pub fn remove(&mut self, filename: &str) -> Result<ObservedSpectrum> {
        let index = self.index_of(filename)?;
        let removed = self.spectra.remove(index);
        self.changed();
        Ok(removed)
    }

    /// Replace the explicit groups of one spectrum
    pub fn set_groups(&mut self, filename: &str, groups: GroupAssignment) -> Result<()> {
        let index = self.index_of(filename)?;
        self.spectra[index].groups = groups
            .into_iter()
            .map(|(name, ids)| (name.to_lowercase(), ids))
            .collect();
        self.changed();
        Ok(())
    }

    /// Apply `f` to one spectrum, then recompute the derived indices
    pub fn modify<F>(&mut self, index: usize, f: F) -> Result<()>
    where
        F: FnOnce(&mut ObservedSpectrum),
    {
        let spectrum = self
            .spectra
            .get_mut(index)
            .ok_or_else(|| SpecFitError::NotFound(format!("observed spectrum #{}", index)))?;
        f(spectrum);
        spectrum.check_korel()?;
        self.changed();
        Ok(())
    }

    /// Apply `f` to every spectrum, then recompute the derived indices
    pub fn modify_all<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut ObservedSpectrum),
    {
        for spectrum in self.spectra.iter_mut() {
            f(spectrum);
            spectrum.check_korel()?;
        }
        self.changed();
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Result<&ObservedSpectrum> {
        let index = self.index_of(filename)?;
        Ok(&self.spectra[index])
    }

    pub fn spectrum(&self, index: usize) -> Option<&ObservedSpectrum> {
        self.spectra.get(index)
    }

    pub fn spectra(&self) -> &[ObservedSpectrum] {
        &self.spectra
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservedSpectrum> {
        self.spectra.iter()
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// Resolved groups of the spectrum at `index`
    pub fn resolved_groups(&self, index: usize) -> Option<&GroupAssignment> {
        self.resolved.get(index)
    }

    /// Counter identifying the current contents of the set
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether every spectrum carries error bars
    pub fn has_errors(&self) -> bool {
        self.spectra.iter().all(|s| s.has_errors())
    }

    /// Largest mean pixel step among the spectra
    pub fn resolution(&self) -> f64 {
        self.spectra.iter().map(|s| s.step()).fold(0.0, f64::max)
    }

    /// Sorted, unique resolved groups per parameter
    ///
    /// With a component only spectra tagged with exactly that component are
    /// considered; `None` or `"all"` covers every spectrum.
    pub fn defined_groups(&self, component: Option<&str>) -> BTreeMap<String, Vec<GroupId>> {
        let component = component.filter(|c| *c != ALL_COMPONENTS);
        let mut groups: BTreeMap<String, BTreeSet<GroupId>> = BTreeMap::new();

        for (spectrum, resolved) in self.spectra.iter().zip(self.resolved.iter()) {
            if component.map_or(false, |c| spectrum.component != c) {
                continue;
            }
            for (name, ids) in resolved {
                groups.entry(name.clone()).or_default().extend(ids.iter().copied());
            }
        }

        groups
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect()
    }

    /// Start a query over the set
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::Array1;
    /// use specfit_rs::observed::{ObservationSet, ObservedSpectrum};
    ///
    /// let mut set = ObservationSet::new();
    /// for name in ["a.dat", "b.dat"] {
    ///     let wave = Array1::linspace(4300.0, 4400.0, 11);
    ///     let spectrum = ObservedSpectrum::new(wave, Array1::ones(11)).unwrap().with_filename(name);
    ///     set.add(spectrum).unwrap();
    /// }
    ///
    /// let matches = set.query().covers(4310.0, 4390.0).group("rv", 1).indices().unwrap();
    /// assert_eq!(matches, vec![1]);
    /// ```
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    /// Recompute the resolved group of every spectrum
    ///
    /// Explicit groups are kept. For parameters other than `rv`, spectra
    /// without an explicit group share the least id not used explicitly. For
    /// `rv` every such spectrum gets its own least unused id, so `n`
    /// unassigned spectra end up in distinct groups.
    pub fn read_groups(&mut self) {
        let mut explicit: BTreeMap<String, BTreeSet<GroupId>> = BTreeMap::new();
        explicit.insert(RV.to_string(), BTreeSet::new());
        for spectrum in &self.spectra {
            for (name, ids) in &spectrum.groups {
                explicit.entry(name.clone()).or_default().extend(ids.iter().copied());
            }
        }

        let mut resolved = vec![GroupAssignment::new(); self.spectra.len()];
        for (name, used) in &explicit {
            let mut taken = used.clone();
            let shared = least_unused(used);

            for (spectrum, groups) in self.spectra.iter().zip(resolved.iter_mut()) {
                let ids = match spectrum.group(name) {
                    Some(ids) if !ids.is_empty() => ids.to_vec(),
                    _ if name == RV => {
                        let id = least_unused(&taken);
                        taken.insert(id);
                        vec![id]
                    }
                    _ => vec![shared],
                };
                groups.insert(name.clone(), ids);
            }
        }

        self.resolved = resolved;
    }

    fn changed(&mut self) {
        self.read_groups();
        self.generation += 1;
    }

    fn index_of(&self, filename: &str) -> Result<usize> {
        self.spectra
            .iter()
            .position(|s| s.filename.as_deref() == Some(filename))
            .ok_or_else(|| SpecFitError::NotFound(format!("observed spectrum {}", filename)))
    }
}

fn least_unused(used: &BTreeSet<GroupId>) -> GroupId {
    (0..).find(|id| !used.contains(id)).unwrap_or_default()
}

/// Conjunctive query over an [`ObservationSet`]
#[derive(Debug, Clone)]
pub struct Query<'a> {
    set: &'a ObservationSet,
    component: Option<String>,
    filename: Option<String>,
    korel: Option<bool>,
    covers: Option<(f64, f64)>,
    groups: Vec<(String, GroupId)>,
    permissive: bool,
}

impl<'a> Query<'a> {
    fn new(set: &'a ObservationSet) -> Self {
        Self {
            set,
            component: None,
            filename: None,
            korel: None,
            covers: None,
            groups: Vec::new(),
            permissive: false,
        }
    }

    /// Spectra of `component`, including composite spectra tagged `"all"`
    pub fn component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn korel(mut self, korel: bool) -> Self {
        self.korel = Some(korel);
        self
    }

    /// Spectra with `spectrum_wmin <= wmin` and `spectrum_wmax >= wmax`
    pub fn covers(mut self, wmin: f64, wmax: f64) -> Self {
        self.covers = Some((wmin, wmax));
        self
    }

    /// Spectra whose resolved groups for `name` contain `group`
    pub fn group(mut self, name: &str, group: GroupId) -> Self {
        self.groups.push((name.to_lowercase(), group));
        self
    }

    /// Ignore group predicates on parameters no spectrum defines
    pub fn permissive(mut self) -> Self {
        self.permissive = true;
        self
    }

    /// Indices of the matching spectra
    ///
    /// A query matching nothing returns an empty vector and logs a warning.
    pub fn indices(&self) -> Result<Vec<usize>> {
        let known: BTreeSet<&String> = self.set.resolved.iter().flat_map(|r| r.keys()).collect();
        let mut groups = Vec::with_capacity(self.groups.len());
        for (name, group) in &self.groups {
            if known.contains(name) {
                groups.push((name, *group));
            } else if !self.permissive {
                return Err(SpecFitError::Configuration(format!(
                    "group key {} is not defined for the observed spectra",
                    name
                )));
            }
        }

        let matches: Vec<usize> = self
            .set
            .spectra
            .iter()
            .zip(self.set.resolved.iter())
            .enumerate()
            .filter(|(_, (spectrum, resolved))| {
                self.component
                    .as_deref()
                    .map_or(true, |c| spectrum.component == c || spectrum.component == ALL_COMPONENTS)
                    && self
                        .filename
                        .as_deref()
                        .map_or(true, |f| spectrum.filename.as_deref() == Some(f))
                    && self.korel.map_or(true, |k| spectrum.korel == k)
                    && self.covers.map_or(true, |(wmin, wmax)| {
                        let (smin, smax) = spectrum.bounds();
                        smin <= wmin + EDGE_TOLERANCE && smax >= wmax - EDGE_TOLERANCE
                    })
                    && groups.iter().all(|(name, group)| {
                        resolved
                            .get(name.as_str())
                            .map_or(false, |ids| ids.contains(group))
                    })
            })
            .map(|(i, _)| i)
            .collect();

        if matches.is_empty() {
            warn!("No observed spectrum matches {}", self.describe());
        }
        Ok(matches)
    }

    /// The matching spectra
    pub fn spectra(&self) -> Result<Vec<&'a ObservedSpectrum>> {
        let set = self.set;
        Ok(self.indices()?.into_iter().map(|i| &set.spectra[i]).collect())
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &self.component {
            parts.push(format!("component: {}", c));
        }
        if let Some(f) = &self.filename {
            parts.push(format!("filename: {}", f));
        }
        if let Some(k) = self.korel {
            parts.push(format!("korel: {}", k));
        }
        if let Some((wmin, wmax)) = self.covers {
            parts.push(format!("wmin: {} wmax: {}", wmin, wmax));
        }
        for (name, group) in &self.groups {
            parts.push(format!("{}: {}", name, group));
        }
        parts.join(" ")
    }
}
