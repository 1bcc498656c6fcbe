//! Grouped parameter registry
//!
//! The registry stores every [`Parameter`] of every component, indexed by
//! `(component, name, group)`. Components keep their registration order;
//! inside a component parameters are ordered by name and then by group. That
//! ordering is the layout of the optimizer vector: [`ParameterRegistry::fitted`]
//! and [`ParameterRegistry::scatter`] both walk it.

use crate::error::{Result, SpecFitError};
use crate::parameters::definitions::{self, DEFINITIONS};
use crate::parameters::parameter::{GroupId, Parameter, ParameterKey, ParameterUpdate};
use ndarray::Array1;
use std::collections::{BTreeMap, BTreeSet};

/// Pseudo-component addressing every component at once.
pub const ALL_COMPONENTS: &str = "all";

#[derive(Debug, Clone, PartialEq)]
struct ComponentEntry {
    name: String,
    parameters: BTreeMap<String, BTreeMap<GroupId, Parameter>>,
}

impl ComponentEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values().flat_map(|groups| groups.values())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Parameter> {
        self.parameters
            .values_mut()
            .flat_map(|groups| groups.values_mut())
    }
}

/// Registry of the physical parameters of all components
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterRegistry {
    components: Vec<ComponentEntry>,

    /// Incremented whenever a parameter instance is created or deleted.
    generation: u64,
}

impl ParameterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from a flat list of parameters (e.g. a saved session)
    pub fn from_parameters<I>(parameters: I) -> Result<Self>
    where
        I: IntoIterator<Item = Parameter>,
    {
        let mut registry = Self::new();
        for parameter in parameters {
            registry.insert(parameter)?;
        }
        Ok(registry)
    }

    /// Register a component with the default stellar parameters
    ///
    /// # Arguments
    ///
    /// * `component` - Name of the new component
    /// * `values` - Values replacing the defaults, keyed by parameter name
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::parameters::ParameterRegistry;
    /// use std::collections::BTreeMap;
    ///
    /// let mut registry = ParameterRegistry::new();
    /// let values = BTreeMap::from([("teff".to_string(), 20000.0)]);
    /// registry.add_component("primary", &values).unwrap();
    ///
    /// assert_eq!(registry.get("primary", "teff", 0).unwrap().value(), 20000.0);
    /// assert_eq!(registry.get("primary", "logg", 0).unwrap().value(), 3.5);
    /// ```
    pub fn add_component(&mut self, component: &str, values: &BTreeMap<String, f64>) -> Result<()> {
        if self.has_component(component) {
            return Err(SpecFitError::Configuration(format!(
                "component {} is already registered",
                component
            )));
        }
        if let Some(unknown) = values.keys().find(|k| definitions::definition(k).is_none()) {
            return Err(SpecFitError::Configuration(format!(
                "{} is not a known stellar parameter",
                unknown
            )));
        }

        for def in DEFINITIONS.iter() {
            let value = values.get(def.name).copied().unwrap_or(def.value);
            let parameter =
                Parameter::new(component, def.name, value, def.vmin, def.vmax, 0)?.with_unit(def.unit);
            self.insert(parameter)?;
        }
        Ok(())
    }

    /// Register a single parameter
    ///
    /// Fails with `Configuration` if `(component, name, group)` already
    /// exists and with `BoundsViolation` if `value` lies outside `[vmin, vmax]`.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        component: &str,
        name: &str,
        value: f64,
        vmin: f64,
        vmax: f64,
        group: GroupId,
        fitted: bool,
    ) -> Result<()> {
        let parameter = Parameter::new(component, name, value, vmin, vmax, group)?.with_fitted(fitted);
        self.insert(parameter)
    }

    /// Insert an already constructed parameter
    pub fn insert(&mut self, parameter: Parameter) -> Result<()> {
        if parameter.component() == ALL_COMPONENTS {
            return Err(SpecFitError::Configuration(format!(
                "'{}' cannot own parameters",
                ALL_COMPONENTS
            )));
        }
        if self.contains(parameter.component(), parameter.name(), parameter.group()) {
            return Err(SpecFitError::Configuration(format!(
                "parameter {} is already registered",
                parameter.key()
            )));
        }

        let index = match self.component_index(parameter.component()) {
            Some(index) => index,
            None => {
                self.components.push(ComponentEntry::new(parameter.component()));
                self.components.len() - 1
            }
        };

        self.components[index]
            .parameters
            .entry(parameter.name().to_string())
            .or_default()
            .insert(parameter.group(), parameter);
        self.generation += 1;
        Ok(())
    }

    /// Create `new_group` of a parameter as a copy of `source_group`
    ///
    /// The copy is independent: later changes to one instance leave the other
    /// untouched. `overrides` is applied to the copy only.
    pub fn clone_parameter(
        &mut self,
        component: &str,
        name: &str,
        source_group: GroupId,
        new_group: GroupId,
        overrides: &ParameterUpdate,
    ) -> Result<()> {
        let mut parameter = self.get(component, name, source_group)?.clone_into_group(new_group);
        parameter.apply(overrides)?;
        self.insert(parameter)
    }

    /// Delete one group instance of a parameter
    ///
    /// The last remaining instance of a parameter cannot be removed; a
    /// component always carries at least one value for each of its names.
    pub fn remove(&mut self, component: &str, name: &str, group: GroupId) -> Result<Parameter> {
        let groups = self
            .component_mut(component)?
            .parameters
            .get_mut(name)
            .ok_or_else(|| not_found(component, name, group))?;

        if !groups.contains_key(&group) {
            return Err(not_found(component, name, group));
        }
        if groups.len() == 1 {
            return Err(SpecFitError::Configuration(format!(
                "cannot remove the only group of {}:{}",
                component, name
            )));
        }

        let removed = groups.remove(&group).ok_or_else(|| not_found(component, name, group))?;
        self.generation += 1;
        Ok(removed)
    }

    pub fn contains(&self, component: &str, name: &str, group: GroupId) -> bool {
        self.get(component, name, group).is_ok()
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.component_index(component).is_some()
    }

    /// Look up one parameter instance
    pub fn get(&self, component: &str, name: &str, group: GroupId) -> Result<&Parameter> {
        self.component_index(component)
            .and_then(|i| self.components[i].parameters.get(name))
            .and_then(|groups| groups.get(&group))
            .ok_or_else(|| not_found(component, name, group))
    }

    /// Mutable lookup of one parameter instance
    pub fn get_mut(&mut self, component: &str, name: &str, group: GroupId) -> Result<&mut Parameter> {
        self.component_mut(component)?
            .parameters
            .get_mut(name)
            .and_then(|groups| groups.get_mut(&group))
            .ok_or_else(|| not_found(component, name, group))
    }

    /// Set the value of one parameter, checking its bounds
    pub fn set_value(&mut self, component: &str, name: &str, group: GroupId, value: f64) -> Result<()> {
        self.get_mut(component, name, group)?.set_value(value)?;
        Ok(())
    }

    pub fn set_bounds(
        &mut self,
        component: &str,
        name: &str,
        group: GroupId,
        vmin: f64,
        vmax: f64,
    ) -> Result<()> {
        self.get_mut(component, name, group)?.set_bounds(vmin, vmax)?;
        Ok(())
    }

    pub fn set_fitted(&mut self, component: &str, name: &str, group: GroupId, fitted: bool) -> Result<()> {
        self.get_mut(component, name, group)?.set_fitted(fitted);
        Ok(())
    }

    /// Apply an update to every matching instance
    ///
    /// `component == None` (or `"all"`) selects every component and
    /// `group == None` every group of `name`.
    ///
    /// # Returns
    ///
    /// The number of parameters updated; zero matches is a `NotFound` error.
    pub fn update(
        &mut self,
        component: Option<&str>,
        name: &str,
        group: Option<GroupId>,
        update: &ParameterUpdate,
    ) -> Result<usize> {
        let component = component.filter(|c| *c != ALL_COMPONENTS);
        if let Some(c) = component {
            self.component_mut(c)?;
        }

        let mut updated = 0;
        for entry in self
            .components
            .iter_mut()
            .filter(|e| component.map_or(true, |c| e.name == c))
        {
            if let Some(groups) = entry.parameters.get_mut(name) {
                for parameter in groups
                    .values_mut()
                    .filter(|p| group.map_or(true, |g| p.group() == g))
                {
                    parameter.apply(update)?;
                    updated += 1;
                }
            }
        }

        if updated == 0 {
            return Err(SpecFitError::NotFound(format!(
                "no parameter {} matches component {} group {}",
                name,
                component.unwrap_or(ALL_COMPONENTS),
                group.map_or_else(|| "any".to_string(), |g| g.to_string())
            )));
        }
        Ok(updated)
    }

    /// Component names in registration order
    pub fn components(&self) -> Vec<&str> {
        self.components.iter().map(|e| e.name.as_str()).collect()
    }

    /// Sorted, unique parameter names across all components
    pub fn parameter_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .components
            .iter()
            .flat_map(|e| e.parameters.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// Sorted, unique groups defined for `name`
    ///
    /// `component == None` (or `"all"`) collects across every component.
    pub fn defined_groups(&self, component: Option<&str>, name: &str) -> Vec<GroupId> {
        let component = component.filter(|c| *c != ALL_COMPONENTS);
        let groups: BTreeSet<GroupId> = self
            .components
            .iter()
            .filter(|e| component.map_or(true, |c| e.name == c))
            .filter_map(|e| e.parameters.get(name))
            .flat_map(|groups| groups.keys().copied())
            .collect();
        groups.into_iter().collect()
    }

    /// Every parameter in vector-layout order
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.components.iter().flat_map(|e| e.iter())
    }

    /// Parameters of one component, vector-layout order
    pub fn component_parameters(&self, component: &str) -> Result<Vec<&Parameter>> {
        let index = self
            .component_index(component)
            .ok_or_else(|| SpecFitError::NotFound(format!("component {}", component)))?;
        Ok(self.components[index].iter().collect())
    }

    /// Total number of parameter instances
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Fitted parameters in the stable vector-layout order
    pub fn fitted(&self) -> Vec<&Parameter> {
        self.iter().filter(|p| p.fitted()).collect()
    }

    pub fn fitted_keys(&self) -> Vec<ParameterKey> {
        self.iter().filter(|p| p.fitted()).map(|p| p.key()).collect()
    }

    pub fn fitted_count(&self) -> usize {
        self.iter().filter(|p| p.fitted()).count()
    }

    /// Current values of the fitted parameters as an optimizer vector
    pub fn fitted_values(&self) -> Array1<f64> {
        self.iter().filter(|p| p.fitted()).map(|p| p.value()).collect()
    }

    /// `(vmin, vmax)` of every fitted parameter
    pub fn fitted_bounds(&self) -> Vec<(f64, f64)> {
        self.iter()
            .filter(|p| p.fitted())
            .map(|p| p.bounds().as_pair())
            .collect()
    }

    /// Write an optimizer vector back into the fitted parameters
    ///
    /// Values are assigned as proposed; unbounded backends may leave the box.
    pub fn scatter(&mut self, vector: &Array1<f64>) -> Result<()> {
        let count = self.fitted_count();
        if vector.len() != count {
            return Err(SpecFitError::DataMismatch(format!(
                "vector of length {} does not match {} fitted parameters",
                vector.len(),
                count
            )));
        }

        let fitted = self
            .components
            .iter_mut()
            .flat_map(|e| e.iter_mut())
            .filter(|p| p.fitted());
        for (parameter, value) in fitted.zip(vector.iter()) {
            parameter.assign(*value);
        }
        Ok(())
    }

    /// Clear the fitted flag of every parameter, returning the previous keys
    pub fn clear_fitted(&mut self) -> Vec<ParameterKey> {
        let previous = self.fitted_keys();
        for parameter in self.components.iter_mut().flat_map(|e| e.iter_mut()) {
            parameter.set_fitted(false);
        }
        previous
    }

    /// Mark exactly `keys` as fitted
    pub fn restore_fitted(&mut self, keys: &[ParameterKey]) -> Result<()> {
        self.clear_fitted();
        for key in keys {
            self.set_fitted(&key.component, &key.name, key.group, true)?;
        }
        Ok(())
    }

    /// Ensure `name` is defined in every group of `groups`
    ///
    /// Missing groups are cloned from the lowest group already defined for
    /// the component. `component` may be `"all"`.
    pub fn set_groups(&mut self, component: &str, name: &str, groups: &[GroupId]) -> Result<()> {
        let targets: Vec<String> = if component == ALL_COMPONENTS {
            self.components.iter().map(|e| e.name.clone()).collect()
        } else {
            self.component_mut(component)?;
            vec![component.to_string()]
        };

        for target in targets {
            let defined = self.defined_groups(Some(&target), name);
            let Some(&source) = defined.first() else {
                continue;
            };
            for group in groups.iter().filter(|g| !defined.contains(g)) {
                self.clone_parameter(&target, name, source, *group, &ParameterUpdate::default())?;
            }
        }
        Ok(())
    }

    /// Values of every parameter of `component` for a group context
    ///
    /// Names present in `groups` must be defined in that group; names absent
    /// from it take their lowest defined group.
    pub fn parameters_for_groups(
        &self,
        component: &str,
        groups: &BTreeMap<String, GroupId>,
    ) -> Result<BTreeMap<String, f64>> {
        let index = self
            .component_index(component)
            .ok_or_else(|| SpecFitError::NotFound(format!("component {}", component)))?;

        let mut values = BTreeMap::new();
        for (name, instances) in &self.components[index].parameters {
            let parameter = match groups.get(name) {
                Some(group) => instances
                    .get(group)
                    .ok_or_else(|| not_found(component, name, *group))?,
                None => match instances.values().next() {
                    Some(parameter) => parameter,
                    None => continue,
                },
            };
            values.insert(name.clone(), parameter.value());
        }
        Ok(values)
    }

    /// Group of every parameter of `component` for a requested context
    ///
    /// A requested group the component does not define falls back to the
    /// lowest defined group, as do names missing from `requested`.
    pub fn resolve_groups(
        &self,
        component: &str,
        requested: &BTreeMap<String, GroupId>,
    ) -> Result<BTreeMap<String, GroupId>> {
        let index = self
            .component_index(component)
            .ok_or_else(|| SpecFitError::NotFound(format!("component {}", component)))?;

        let mut resolved = BTreeMap::new();
        for (name, instances) in &self.components[index].parameters {
            let group = match requested.get(name) {
                Some(group) if instances.contains_key(group) => *group,
                _ => match instances.keys().next() {
                    Some(group) => *group,
                    None => continue,
                },
            };
            resolved.insert(name.clone(), group);
        }
        Ok(resolved)
    }

    /// Components with a fitted parameter that requires a new grid interpolation
    pub fn components_needing_synthesis(&self) -> BTreeSet<String> {
        self.components
            .iter()
            .filter(|e| {
                e.iter()
                    .any(|p| p.fitted() && !definitions::is_directly_applied(p.name()))
            })
            .map(|e| e.name.clone())
            .collect()
    }

    /// Counter identifying the current set of parameter instances
    pub fn topology_generation(&self) -> u64 {
        self.generation
    }

    fn component_index(&self, component: &str) -> Option<usize> {
        self.components.iter().position(|e| e.name == component)
    }

    fn component_mut(&mut self, component: &str) -> Result<&mut ComponentEntry> {
        self.components
            .iter_mut()
            .find(|e| e.name == component)
            .ok_or_else(|| SpecFitError::NotFound(format!("component {}", component)))
    }
}

fn not_found(component: &str, name: &str, group: GroupId) -> SpecFitError {
    SpecFitError::NotFound(format!("parameter {}", ParameterKey::new(component, name, group)))
}
