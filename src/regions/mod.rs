//! # Wavelength Regions
//!
//! A [`Region`] is a wavelength window in which models are compared with the
//! observations. Several components may be attached to one region, each with
//! its own group overrides. Every region carries a relative luminosity (`lr`)
//! group, assigned automatically when the user does not choose one.

use crate::error::{Result, SpecFitError};
use crate::observed::ObservedSpectrum;
use crate::parameters::definitions::LR;
use crate::parameters::{GroupId, ALL_COMPONENTS};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default tolerance when comparing region boundaries.
pub const BOUNDS_TOLERANCE: f64 = 1e-6;

/// One component attached to a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub component: String,

    /// Groups chosen explicitly, including the region's `lr` group
    pub groups: BTreeMap<String, GroupId>,

    /// Groups filled in by [`RegionSet::setup_undefined_groups`]
    #[serde(skip)]
    defaults: BTreeMap<String, GroupId>,
}

impl RegionEntry {
    fn new(component: &str, groups: BTreeMap<String, GroupId>) -> Self {
        Self {
            component: component.to_string(),
            groups,
            defaults: BTreeMap::new(),
        }
    }

    /// Explicit groups merged with the automatic defaults
    pub fn effective_groups(&self) -> BTreeMap<String, GroupId> {
        let mut groups = self.defaults.clone();
        groups.extend(self.groups.iter().map(|(k, v)| (k.clone(), *v)));
        groups
    }

    /// Whether this entry applies to `component`
    pub fn applies_to(&self, component: &str) -> bool {
        self.component == component || self.component == ALL_COMPONENTS
    }
}

/// A wavelength window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub identification: String,
    pub wmin: f64,
    pub wmax: f64,
    pub entries: Vec<RegionEntry>,
}

impl Region {
    pub fn has_component(&self, component: &str) -> bool {
        self.entries.iter().any(|e| e.applies_to(component))
    }

    /// The relative luminosity group shared by all components of the region
    pub fn lr_group(&self) -> Option<GroupId> {
        self.entries.first().and_then(|e| e.groups.get(LR).copied())
    }

    /// Effective groups of `component` in this region
    pub fn groups_for(&self, component: &str) -> Option<BTreeMap<String, GroupId>> {
        self.entries
            .iter()
            .find(|e| e.component == component)
            .or_else(|| self.entries.iter().find(|e| e.applies_to(component)))
            .map(|e| e.effective_groups())
    }
}

/// Ordered collection of regions
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSet {
    regions: Vec<Region>,
    tolerance: f64,
    generation: u64,
}

impl Default for RegionSet {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            tolerance: BOUNDS_TOLERANCE,
            generation: 0,
        }
    }
}

impl RegionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Region set matching boundaries with a custom tolerance
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    /// Add a region, or attach a component to an existing one
    ///
    /// A region with the same identification, or with boundaries equal
    /// within the tolerance, receives the component instead of a duplicate
    /// region being created. Attaching `"all"` or a component that is
    /// already present only logs a warning.
    ///
    /// # Returns
    ///
    /// The identification of the region the component ended up in.
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::regions::RegionSet;
    /// use std::collections::BTreeMap;
    ///
    /// let mut regions = RegionSet::new();
    /// let first = regions.add_region("all", None, 4300.0, 4380.0, BTreeMap::new()).unwrap();
    /// let second = regions.add_region("all", None, 4460.0, 4500.0, BTreeMap::new()).unwrap();
    ///
    /// assert_eq!(first, "region00");
    /// assert_eq!(regions.get(&first).unwrap().lr_group(), Some(0));
    /// assert_eq!(regions.get(&second).unwrap().lr_group(), Some(1));
    /// ```
    pub fn add_region(
        &mut self,
        component: &str,
        identification: Option<&str>,
        wmin: f64,
        wmax: f64,
        groups: BTreeMap<String, GroupId>,
    ) -> Result<String> {
        let component = component.to_lowercase();
        let identification = identification.map(|i| i.to_lowercase());
        let mut groups: BTreeMap<String, GroupId> = groups
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        let existing = match identification.as_deref() {
            Some(id) => self.regions.iter().position(|r| r.identification == id),
            None => self.find(wmin, wmax),
        };

        if existing.is_none() && (wmin.is_nan() || wmax.is_nan() || wmin >= wmax) {
            return Err(SpecFitError::Configuration(format!(
                "region boundaries are not ordered: ({}, {})",
                wmin, wmax
            )));
        }

        let id = match existing {
            Some(index) => {
                let region = &mut self.regions[index];
                if component == ALL_COMPONENTS {
                    warn!(
                        "The region already exists as {} -> doing nothing",
                        region.identification
                    );
                    return Ok(region.identification.clone());
                }
                if region.has_component(&component) {
                    warn!(
                        "Component {} is already set for region {} -> doing nothing",
                        component, region.identification
                    );
                    return Ok(region.identification.clone());
                }

                if let Some(lr) = region.lr_group() {
                    groups.insert(LR.to_string(), lr);
                }
                debug!("Adding component {} to region {}", component, region.identification);
                region.entries.push(RegionEntry::new(&component, groups));
                region.identification.clone()
            }
            None => {
                let id = identification.unwrap_or_else(|| format!("region{:02}", self.regions.len()));
                if !groups.contains_key(LR) {
                    let used = self.explicit_groups().remove(LR).unwrap_or_default();
                    let lr = (0..).find(|g| !used.contains(g)).unwrap_or_default();
                    groups.insert(LR.to_string(), lr);
                }

                debug!("Creating new region {} ({}, {})", id, wmin, wmax);
                self.regions.push(Region {
                    identification: id.clone(),
                    wmin,
                    wmax,
                    entries: vec![RegionEntry::new(&component, groups)],
                });
                id
            }
        };

        self.generation += 1;
        self.setup_undefined_groups();
        Ok(id)
    }

    /// Derive regions from the extent of the observed spectra
    ///
    /// One region per distinct `(ceil(wmin), floor(wmax))` per component.
    pub fn add_from_observations<'a, I>(&mut self, spectra: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ObservedSpectrum>,
    {
        let mut limits: BTreeMap<String, BTreeSet<(i64, i64)>> = BTreeMap::new();
        for spectrum in spectra {
            let (wmin, wmax) = spectrum.bounds();
            limits
                .entry(spectrum.component.clone())
                .or_default()
                .insert((wmin.ceil() as i64, wmax.floor() as i64));
        }

        if limits.is_empty() {
            return Err(SpecFitError::Configuration(
                "cannot derive regions from an empty list of observed spectra".to_string(),
            ));
        }

        for (component, bounds) in limits {
            for (wmin, wmax) in bounds {
                self.add_region(&component, None, wmin as f64, wmax as f64, BTreeMap::new())?;
            }
        }
        Ok(())
    }

    /// Give every (region, component) a value for every known group key
    ///
    /// A missing key receives the least id never chosen explicitly for that
    /// key anywhere, so defaults cannot collide with deliberate choices. The
    /// defaults are recomputed from scratch on every call.
    pub fn setup_undefined_groups(&mut self) {
        let explicit = self.explicit_groups();

        for entry in self.regions.iter_mut().flat_map(|r| r.entries.iter_mut()) {
            entry.defaults.clear();
            for (key, used) in &explicit {
                if !entry.groups.contains_key(key) {
                    let id = (0..).find(|g| !used.contains(g)).unwrap_or_default();
                    entry.defaults.insert(key.clone(), id);
                }
            }
        }
    }

    /// Effective groups per component and parameter over all regions
    pub fn region_groups(&self) -> BTreeMap<String, BTreeMap<String, Vec<GroupId>>> {
        let mut groups: BTreeMap<String, BTreeMap<String, BTreeSet<GroupId>>> = BTreeMap::new();
        for entry in self.regions.iter().flat_map(|r| r.entries.iter()) {
            let component = groups.entry(entry.component.clone()).or_default();
            for (key, id) in entry.effective_groups() {
                component.entry(key).or_default().insert(id);
            }
        }

        groups
            .into_iter()
            .map(|(c, keys)| {
                let keys = keys
                    .into_iter()
                    .map(|(k, ids)| (k, ids.into_iter().collect()))
                    .collect();
                (c, keys)
            })
            .collect()
    }

    /// Sorted unique groups per parameter, regardless of component
    pub fn defined_groups(&self) -> BTreeMap<String, Vec<GroupId>> {
        let mut groups: BTreeMap<String, BTreeSet<GroupId>> = BTreeMap::new();
        for entry in self.regions.iter().flat_map(|r| r.entries.iter()) {
            for (key, id) in entry.effective_groups() {
                groups.entry(key).or_default().insert(id);
            }
        }
        groups
            .into_iter()
            .map(|(k, ids)| (k, ids.into_iter().collect()))
            .collect()
    }

    /// Whether some region uses `group` of `name` for `component`
    pub fn references_group(&self, component: &str, name: &str, group: GroupId) -> bool {
        self.regions
            .iter()
            .flat_map(|r| r.entries.iter())
            .filter(|e| e.applies_to(component))
            .any(|e| e.effective_groups().get(name) == Some(&group))
    }

    /// `(identification, wmin, wmax)` of every region
    pub fn wavelengths(&self) -> Vec<(String, f64, f64)> {
        self.regions
            .iter()
            .map(|r| (r.identification.clone(), r.wmin, r.wmax))
            .collect()
    }

    pub fn get(&self, identification: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.identification == identification)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Counter identifying the current set of regions and entries
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn find(&self, wmin: f64, wmax: f64) -> Option<usize> {
        self.regions.iter().position(|r| {
            (r.wmin - wmin).abs() < self.tolerance && (r.wmax - wmax).abs() < self.tolerance
        })
    }

    fn explicit_groups(&self) -> BTreeMap<String, BTreeSet<GroupId>> {
        let mut groups: BTreeMap<String, BTreeSet<GroupId>> = BTreeMap::new();
        for entry in self.regions.iter().flat_map(|r| r.entries.iter()) {
            for (key, id) in &entry.groups {
                groups.entry(key.clone()).or_default().insert(*id);
            }
        }
        groups
    }
}

impl fmt::Display for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for region in &self.regions {
            writeln!(
                f,
                "Region name: {}: (wmin, wmax) = ({}, {}):",
                region.identification, region.wmin, region.wmax
            )?;
            for entry in &region.entries {
                writeln!(
                    f,
                    "component: {} groups: {:?}",
                    entry.component,
                    entry.effective_groups()
                )?;
            }
        }
        Ok(())
    }
}
