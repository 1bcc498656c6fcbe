//! A single comparison between a model and an observation.

use crate::error::{Result, SpecFitError};
use crate::parameters::GroupId;
use crate::synthetic::ParameterValues;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt;

/// The part of a comparison contributed by one component
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentModel {
    pub component: String,

    /// Group of every parameter of the component in this comparison
    pub groups: BTreeMap<String, GroupId>,

    /// Parameter values used for the last population
    pub values: ParameterValues,

    pub(crate) synthetic: Option<Array1<f64>>,
}

impl ComponentModel {
    pub(crate) fn new(component: &str, groups: BTreeMap<String, GroupId>) -> Self {
        Self {
            component: component.to_string(),
            groups,
            values: ParameterValues::new(),
            synthetic: None,
        }
    }
}

/// Observed pixels falling inside a region
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedWindow {
    /// Index of the spectrum in the observation set
    pub index: usize,
    pub label: String,
    pub wave: Array1<f64>,
    pub intens: Array1<f64>,
    pub error: Option<Array1<f64>>,
    pub korel: bool,
    pub fwhm: f64,
}

/// One `(region, group context, observation)` unit of the objective
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub region: String,
    pub wmin: f64,
    pub wmax: f64,

    /// Group context the comparison was enumerated for
    pub groups: BTreeMap<String, GroupId>,

    /// `None` when only synthetic spectra are computed
    pub observed: Option<ObservedWindow>,

    pub components: Vec<ComponentModel>,

    pub(crate) chi2: Option<f64>,
}

impl Comparison {
    /// Synthetic intensities of one component
    pub fn synthetic(&self, component: &str) -> Result<&Array1<f64>> {
        let model = self
            .components
            .iter()
            .find(|m| m.component == component)
            .ok_or_else(|| {
                SpecFitError::NotFound(format!(
                    "component {} in comparison for region {}",
                    component, self.region
                ))
            })?;
        model.synthetic.as_ref().ok_or_else(|| {
            SpecFitError::State(format!(
                "comparison for region {} has not been populated",
                self.region
            ))
        })
    }

    /// Sum of the component spectra
    pub fn model(&self) -> Result<Array1<f64>> {
        let mut total: Option<Array1<f64>> = None;
        for model in &self.components {
            let synthetic = self.synthetic(&model.component)?;
            total = Some(match total {
                Some(sum) => sum + synthetic,
                None => synthetic.clone(),
            });
        }
        total.ok_or_else(|| {
            SpecFitError::State(format!("comparison for region {} has no components", self.region))
        })
    }

    /// Chi-square of this comparison
    ///
    /// Only available once populated against an observation with errors.
    pub fn chi2(&self) -> Result<f64> {
        let observed = self.observed.as_ref().ok_or_else(|| {
            SpecFitError::State(format!(
                "comparison for region {} has no observed spectrum",
                self.region
            ))
        })?;
        if observed.error.is_none() {
            return Err(SpecFitError::State(format!(
                "observed spectrum {} has no error bars",
                observed.label
            )));
        }
        self.chi2.ok_or_else(|| {
            SpecFitError::State(format!(
                "comparison for region {} has not been populated",
                self.region
            ))
        })
    }

    /// Number of observed pixels entering the chi-square
    pub fn npixels(&self) -> usize {
        self.observed.as_ref().map_or(0, |o| o.wave.len())
    }

    pub fn is_populated(&self) -> bool {
        self.components.iter().all(|m| m.synthetic.is_some())
    }

    /// Chi-square of a model against an observed window
    pub(crate) fn evaluate(observed: &ObservedWindow, model: &Array1<f64>) -> Result<Option<f64>> {
        if model.len() != observed.intens.len() {
            return Err(SpecFitError::DataMismatch(format!(
                "synthetic spectrum ({}) and observed spectrum {} ({}) lengths differ",
                model.len(),
                observed.label,
                observed.intens.len()
            )));
        }
        Ok(observed.error.as_ref().map(|error| {
            observed
                .intens
                .iter()
                .zip(model.iter())
                .zip(error.iter())
                .map(|((o, m), e)| ((o - m) / e).powi(2))
                .sum()
        }))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region: {} ({}, {}) groups: {:?} observed: {} components: [{}] chi2: {}",
            self.region,
            self.wmin,
            self.wmax,
            self.groups,
            self.observed.as_ref().map_or("none", |o| o.label.as_str()),
            self.components
                .iter()
                .map(|m| m.component.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            self.chi2.map_or_else(|| "n/a".to_string(), |c| format!("{:.6}", c))
        )
    }
}
