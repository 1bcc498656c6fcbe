//! Saving and restoring a fitting session.
//!
//! A session is written as one versioned JSON document holding the
//! parameter registry, the regions, the observed spectra and the fitter
//! configuration. Spectra read from files are stored by filename and read
//! again on load; spectra built in memory are stored inline.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use crate::error::{Result, SpecFitError};
use crate::fitter::FitterConfig;
use crate::observed::{ObservationSet, ObservedSpectrum};
use crate::parameters::{GroupId, Parameter, ParameterRegistry};
use crate::regions::RegionSet;

/// Version written into every document
pub const FORMAT_VERSION: u32 = 1;

/// Goodness of fit at the time of saving
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChiSquareSummary {
    pub chi2: f64,

    /// Observed pixels minus fitted parameters
    pub degrees_of_freedom: i64,

    /// `chi2 / dof`, absent when there are no degrees of freedom left
    pub reduced: Option<f64>,
}

impl ChiSquareSummary {
    pub fn new(chi2: f64, degrees_of_freedom: i64) -> Self {
        let reduced = if degrees_of_freedom > 0 {
            Some(chi2 / degrees_of_freedom as f64)
        } else {
            None
        };
        Self {
            chi2,
            degrees_of_freedom,
            reduced,
        }
    }
}

/// One component entry of a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRegion {
    pub identification: String,
    pub wmin: f64,
    pub wmax: f64,
    pub component: String,

    /// Groups given by the user (including the relative luminosity group)
    pub groups: BTreeMap<String, GroupId>,
}

/// Pixels of a spectrum that has no file to be read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedData {
    pub wave: Vec<f64>,
    pub intens: Vec<f64>,
    #[serde(default)]
    pub error: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedObservation {
    pub filename: Option<String>,
    pub component: String,
    pub korel: bool,
    pub global_error: Option<f64>,
    pub instrumental_width: f64,
    pub hjd: Option<f64>,

    /// Resolved groups, restored as explicit ones
    pub groups: BTreeMap<String, Vec<GroupId>>,

    #[serde(default)]
    pub data: Option<SavedData>,
}

/// The whole session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub format_version: u32,
    pub parameters: Vec<Parameter>,
    pub regions: Vec<SavedRegion>,
    pub observations: Vec<SavedObservation>,
    #[serde(default)]
    pub fitter: Option<FitterConfig>,
    #[serde(default)]
    pub chi_square: Option<ChiSquareSummary>,
}

impl SavedSession {
    /// Snapshot the current state of a session
    pub fn capture(
        registry: &ParameterRegistry,
        regions: &RegionSet,
        observations: &ObservationSet,
        fitter: Option<&FitterConfig>,
        chi_square: Option<ChiSquareSummary>,
    ) -> Self {
        let parameters = registry.iter().cloned().collect();

        let regions = regions
            .iter()
            .flat_map(|region| {
                region.entries.iter().map(move |entry| SavedRegion {
                    identification: region.identification.clone(),
                    wmin: region.wmin,
                    wmax: region.wmax,
                    component: entry.component.clone(),
                    groups: entry.groups.clone(),
                })
            })
            .collect();

        let observations = observations
            .iter()
            .enumerate()
            .map(|(index, spectrum)| {
                let data = match spectrum.filename {
                    Some(_) => None,
                    None => Some(SavedData {
                        wave: spectrum.wave().to_vec(),
                        intens: spectrum.intens().to_vec(),
                        error: spectrum.error().map(|e| e.to_vec()),
                    }),
                };
                SavedObservation {
                    filename: spectrum.filename.clone(),
                    component: spectrum.component.clone(),
                    korel: spectrum.korel,
                    global_error: spectrum.global_error(),
                    instrumental_width: spectrum.instrumental_width,
                    hjd: spectrum.hjd,
                    groups: observations.resolved_groups(index).cloned().unwrap_or_default(),
                    data,
                }
            })
            .collect();

        Self {
            format_version: FORMAT_VERSION,
            parameters,
            regions,
            observations,
            fitter: fitter.cloned(),
            chi_square,
        }
    }

    /// Rebuild the parameter registry
    ///
    /// Values are restored as saved. An unbounded fit may have left a value
    /// outside its bounds; the next fit starting from it rejects it instead.
    pub fn registry(&self) -> Result<ParameterRegistry> {
        for parameter in &self.parameters {
            if parameter.bounds().check(parameter.value()).is_err() {
                warn!(
                    "{} = {} lies outside [{}, {}]",
                    parameter.key(),
                    parameter.value(),
                    parameter.vmin(),
                    parameter.vmax()
                );
            }
        }
        ParameterRegistry::from_parameters(self.parameters.iter().cloned())
    }

    /// Rebuild the regions, matching boundaries within `tolerance`
    pub fn regions(&self, tolerance: f64) -> Result<RegionSet> {
        let mut regions = RegionSet::with_tolerance(tolerance);
        for saved in &self.regions {
            regions.add_region(
                &saved.component,
                Some(&saved.identification),
                saved.wmin,
                saved.wmax,
                saved.groups.clone(),
            )?;
        }
        Ok(regions)
    }

    /// Rebuild the observed spectra, reading files where they were read from
    pub fn observations(&self) -> Result<ObservationSet> {
        let mut spectra = Vec::with_capacity(self.observations.len());
        for saved in &self.observations {
            let mut spectrum = match (&saved.data, &saved.filename) {
                (Some(data), _) => {
                    let mut spectrum = ObservedSpectrum::new(
                        data.wave.iter().copied().collect(),
                        data.intens.iter().copied().collect(),
                    )?;
                    match (&data.error, saved.global_error) {
                        (_, Some(error)) => spectrum.set_global_error(error)?,
                        (Some(error), None) => spectrum.set_error(error.iter().copied().collect())?,
                        (None, None) => {}
                    }
                    if let Some(filename) = &saved.filename {
                        spectrum.filename = Some(filename.clone());
                    }
                    spectrum
                }
                (None, Some(filename)) => ObservedSpectrum::from_file(filename, saved.global_error)?,
                (None, None) => {
                    return Err(SpecFitError::Parse(
                        "observed spectrum has neither a filename nor inline data".to_string(),
                    ))
                }
            };

            spectrum.component = saved.component.clone();
            spectrum.korel = saved.korel;
            spectrum.instrumental_width = saved.instrumental_width;
            spectrum.hjd = saved.hjd;
            spectrum.groups = saved.groups.clone();
            spectra.push(spectrum);
        }
        ObservationSet::from_spectra(spectra)
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a document, rejecting other format versions
    pub fn from_json(json: &str) -> Result<Self> {
        let session: SavedSession = serde_json::from_str(json)?;
        if session.format_version != FORMAT_VERSION {
            return Err(SpecFitError::Parse(format!(
                "unsupported session format version {} (expected {})",
                session.format_version, FORMAT_VERSION
            )));
        }
        Ok(session)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}
