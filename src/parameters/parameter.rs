//! Parameter definition and implementation
//!
//! A [`Parameter`] is one scalar physical quantity of one component in one
//! group. Several parameters with the same name may exist for a component,
//! one per group, which is how a quantity is allowed to diverge between
//! observations (e.g. one radial velocity per epoch) while others stay shared.

use crate::parameters::bounds::{Bounds, BoundsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer tag distinguishing instances of the same parameter.
pub type GroupId = usize;

/// The implicit group every parameter starts in.
pub const DEFAULT_GROUP: GroupId = 0;

/// Identity of a parameter inside the registry: `(component, name, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterKey {
    pub component: String,
    pub name: String,
    pub group: GroupId,
}

impl ParameterKey {
    pub fn new(component: &str, name: &str, group: GroupId) -> Self {
        Self {
            component: component.to_string(),
            name: name.to_string(),
            group,
        }
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.component, self.name, self.group)
    }
}

/// A physical parameter of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter, lowercase (`teff`, `rv`, ...)
    name: String,

    /// Component owning the parameter
    component: String,

    /// Group this instance belongs to
    group: GroupId,

    /// Current value
    value: f64,

    /// Allowed interval
    bounds: Bounds,

    /// Physical unit, informative only
    unit: String,

    /// Whether the parameter takes part in the optimization vector
    fitted: bool,
}

impl Parameter {
    /// Create a new parameter, checking that the value lies inside its bounds
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::parameters::Parameter;
    ///
    /// let p = Parameter::new("primary", "teff", 20000.0, 6000.0, 50000.0, 0).unwrap();
    /// assert_eq!(p.name(), "teff");
    /// assert_eq!(p.group(), 0);
    /// assert!(!p.fitted());
    /// assert!(Parameter::new("primary", "teff", 100.0, 6000.0, 50000.0, 0).is_err());
    /// ```
    pub fn new(
        component: &str,
        name: &str,
        value: f64,
        vmin: f64,
        vmax: f64,
        group: GroupId,
    ) -> Result<Self, BoundsError> {
        let bounds = Bounds::new(vmin, vmax)?;
        bounds.check(value)?;

        Ok(Self {
            name: name.to_lowercase(),
            component: component.to_string(),
            group,
            value,
            bounds,
            unit: String::new(),
            fitted: false,
        })
    }

    /// Builder-style unit assignment
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    /// Builder-style fitted flag
    pub fn with_fitted(mut self, fitted: bool) -> Self {
        self.fitted = fitted;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn key(&self) -> ParameterKey {
        ParameterKey::new(&self.component, &self.name, self.group)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value of the parameter
    ///
    /// # Returns
    ///
    /// `Ok(())` if the value was set successfully, or an error if the value is outside bounds
    pub fn set_value(&mut self, value: f64) -> Result<(), BoundsError> {
        self.bounds.check(value)?;
        self.value = value;
        Ok(())
    }

    /// Assign a value proposed by an optimizer without a bounds check.
    ///
    /// Unbounded local backends may step outside `[vmin, vmax]`; the
    /// synthesis collaborator decides what such a value means.
    pub(crate) fn assign(&mut self, value: f64) {
        self.value = value;
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn vmin(&self) -> f64 {
        self.bounds.min
    }

    pub fn vmax(&self) -> f64 {
        self.bounds.max
    }

    /// Set the bounds for the parameter
    ///
    /// The current value must stay inside the new interval.
    pub fn set_bounds(&mut self, vmin: f64, vmax: f64) -> Result<(), BoundsError> {
        let bounds = Bounds::new(vmin, vmax)?;
        bounds.check(self.value)?;
        self.bounds = bounds;
        Ok(())
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn fitted(&self) -> bool {
        self.fitted
    }

    pub fn set_fitted(&mut self, fitted: bool) {
        self.fitted = fitted;
    }

    /// Copy of this parameter moved to another group
    pub(crate) fn clone_into_group(&self, group: GroupId) -> Self {
        let mut clone = self.clone();
        clone.group = group;
        clone
    }

    /// Apply a partial update, validating the resulting value/bounds pair
    pub fn apply(&mut self, update: &ParameterUpdate) -> Result<(), BoundsError> {
        let vmin = update.vmin.unwrap_or(self.bounds.min);
        let vmax = update.vmax.unwrap_or(self.bounds.max);
        let value = update.value.unwrap_or(self.value);

        let bounds = Bounds::new(vmin, vmax)?;
        bounds.check(value)?;

        self.bounds = bounds;
        self.value = value;
        if let Some(fitted) = update.fitted {
            self.fitted = fitted;
        }
        Ok(())
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (group {}) = {} [{}, {}] {} fitted: {}",
            self.component,
            self.name,
            self.group,
            self.value,
            self.bounds.min,
            self.bounds.max,
            self.unit,
            self.fitted
        )
    }
}

/// Partial update of a parameter; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub value: Option<f64>,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    pub fitted: Option<bool>,
}

impl ParameterUpdate {
    pub fn value(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn fitted(fitted: bool) -> Self {
        Self {
            fitted: Some(fitted),
            ..Self::default()
        }
    }

    pub fn bounds(vmin: f64, vmax: f64) -> Self {
        Self {
            vmin: Some(vmin),
            vmax: Some(vmax),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.vmin.is_none() && self.vmax.is_none() && self.fitted.is_none()
    }
}
