//! A single observed spectrum.

use crate::error::{Result, SpecFitError};
use crate::parameters::{GroupId, ALL_COMPONENTS};
use log::{debug, warn};
use ndarray::Array1;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Tolerance used when a requested window touches the edge of the spectrum.
pub const EDGE_TOLERANCE: f64 = 1e-6;

/// One observed spectrum with optional error bars and group assignment
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSpectrum {
    wave: Array1<f64>,
    intens: Array1<f64>,
    error: Option<Array1<f64>>,
    global_error: Option<f64>,

    /// Source file, also the identifier used for queries
    pub filename: Option<String>,

    /// Component the spectrum belongs to, `"all"` for composite spectra
    pub component: String,

    /// Disentangled (KOREL) spectrum of a single component
    pub korel: bool,

    /// Groups explicitly requested by the user, keyed by parameter name
    pub groups: BTreeMap<String, Vec<GroupId>>,

    /// FWHM of the instrumental profile in wavelength units
    pub instrumental_width: f64,

    /// Heliocentric Julian date of the exposure
    pub hjd: Option<f64>,
}

impl ObservedSpectrum {
    /// Create a composite spectrum from wavelength and intensity arrays
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use specfit_rs::observed::ObservedSpectrum;
    ///
    /// let spectrum = ObservedSpectrum::new(array![4300.0, 4300.5, 4301.0], array![1.0, 0.9, 1.0])
    ///     .unwrap()
    ///     .with_global_error(0.01)
    ///     .unwrap();
    /// assert!(spectrum.has_errors());
    /// assert_eq!(spectrum.bounds(), (4300.0, 4301.0));
    /// ```
    pub fn new(wave: Array1<f64>, intens: Array1<f64>) -> Result<Self> {
        if wave.len() != intens.len() {
            return Err(SpecFitError::DataMismatch(format!(
                "wavelength ({}) and intensity ({}) lengths differ",
                wave.len(),
                intens.len()
            )));
        }
        if wave.is_empty() {
            return Err(SpecFitError::DataMismatch("empty spectrum".to_string()));
        }

        Ok(Self {
            wave,
            intens,
            error: None,
            global_error: None,
            filename: None,
            component: ALL_COMPONENTS.to_string(),
            korel: false,
            groups: BTreeMap::new(),
            instrumental_width: 0.0,
            hjd: None,
        })
    }

    /// Read a spectrum from a whitespace separated text file
    ///
    /// The file holds two (wavelength, intensity) or three (wavelength,
    /// intensity, error) columns; lines starting with `#` are skipped. A
    /// `global_error` is used when the file has no error column.
    pub fn from_file<P: AsRef<Path>>(path: P, global_error: Option<f64>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let mut wave = Vec::new();
        let mut intens = Vec::new();
        let mut error = Vec::new();
        let mut columns = None;

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let values = line
                .split_whitespace()
                .map(|token| token.parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .map_err(|e| {
                    SpecFitError::Parse(format!("{}:{}: {}", path.display(), lineno + 1, e))
                })?;

            let ncols = values.len().min(3);
            if ncols < 2 {
                return Err(SpecFitError::Parse(format!(
                    "{}:{}: expected at least two columns",
                    path.display(),
                    lineno + 1
                )));
            }
            if *columns.get_or_insert(ncols) != ncols {
                return Err(SpecFitError::Parse(format!(
                    "{}:{}: inconsistent number of columns",
                    path.display(),
                    lineno + 1
                )));
            }

            wave.push(values[0]);
            intens.push(values[1]);
            if ncols == 3 {
                error.push(values[2]);
            }
        }

        let mut spectrum = Self::new(Array1::from(wave), Array1::from(intens))?;
        spectrum.filename = Some(path.to_string_lossy().into_owned());

        if !error.is_empty() {
            spectrum.set_error(Array1::from(error))?;
        } else if let Some(global_error) = global_error {
            spectrum.set_global_error(global_error)?;
        } else {
            warn!(
                "No error bars found in {}; they have to be provided before fitting",
                path.display()
            );
        }

        debug!("Loaded {} pixels from {}", spectrum.len(), path.display());
        Ok(spectrum)
    }

    /// Builder-style component assignment
    pub fn with_component(mut self, component: &str) -> Self {
        self.component = component.to_string();
        self
    }

    /// Builder-style KOREL flag
    pub fn with_korel(mut self, korel: bool) -> Self {
        self.korel = korel;
        self
    }

    /// Builder-style global error
    pub fn with_global_error(mut self, error: f64) -> Result<Self> {
        self.set_global_error(error)?;
        Ok(self)
    }

    /// Builder-style group assignment for one parameter
    pub fn with_group(mut self, name: &str, groups: &[GroupId]) -> Self {
        self.groups.insert(name.to_lowercase(), groups.to_vec());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_instrumental_width(mut self, fwhm: f64) -> Self {
        self.instrumental_width = fwhm;
        self
    }

    pub fn with_hjd(mut self, hjd: f64) -> Self {
        self.hjd = Some(hjd);
        self
    }

    /// KOREL spectra are single-component by construction
    pub fn check_korel(&self) -> Result<()> {
        if self.korel && self.component == ALL_COMPONENTS {
            return Err(SpecFitError::Configuration(format!(
                "KOREL spectrum {} must be assigned a component",
                self.label()
            )));
        }
        Ok(())
    }

    /// Assign one error value to every pixel
    pub fn set_global_error(&mut self, error: f64) -> Result<()> {
        check_error(error)?;
        self.error = Some(Array1::from_elem(self.wave.len(), error));
        self.global_error = Some(error);
        Ok(())
    }

    /// Assign per-pixel errors
    pub fn set_error(&mut self, error: Array1<f64>) -> Result<()> {
        if error.len() != self.wave.len() {
            return Err(SpecFitError::DataMismatch(format!(
                "error vector ({}) and spectrum ({}) lengths differ",
                error.len(),
                self.wave.len()
            )));
        }
        if let Some(&bad) = error.iter().find(|e| check_error(**e).is_err()) {
            return check_error(bad);
        }
        self.error = Some(error);
        self.global_error = None;
        Ok(())
    }

    pub fn has_errors(&self) -> bool {
        self.error.is_some()
    }

    pub fn global_error(&self) -> Option<f64> {
        self.global_error
    }

    pub fn wave(&self) -> &Array1<f64> {
        &self.wave
    }

    pub fn intens(&self) -> &Array1<f64> {
        &self.intens
    }

    pub fn error(&self) -> Option<&Array1<f64>> {
        self.error.as_ref()
    }

    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Minimal and maximal wavelength
    pub fn bounds(&self) -> (f64, f64) {
        let wmin = self.wave.iter().copied().fold(f64::INFINITY, f64::min);
        let wmax = self.wave.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (wmin, wmax)
    }

    /// Mean wavelength step between pixels
    pub fn step(&self) -> f64 {
        if self.wave.len() < 2 {
            return 0.0;
        }
        let (wmin, wmax) = self.bounds();
        (wmax - wmin) / (self.wave.len() - 1) as f64
    }

    /// Whether the spectrum covers `[wmin, wmax]`
    pub fn covers(&self, wmin: f64, wmax: f64) -> bool {
        let (smin, smax) = self.bounds();
        smin <= wmin && smax >= wmax
    }

    /// Extract the pixels with `wmin <= wave <= wmax`
    ///
    /// # Returns
    ///
    /// `(wave, intens, error)`; requesting a window reaching outside the
    /// observed range is a `DataMismatch`.
    pub fn get_spectrum(
        &self,
        wmin: f64,
        wmax: f64,
    ) -> Result<(Array1<f64>, Array1<f64>, Option<Array1<f64>>)> {
        let (smin, smax) = self.bounds();
        if wmin - smin < -EDGE_TOLERANCE || wmax - smax > EDGE_TOLERANCE {
            return Err(SpecFitError::DataMismatch(format!(
                "requested window ({}, {}) lies outside spectrum {} ({}, {})",
                wmin,
                wmax,
                self.label(),
                smin,
                smax
            )));
        }

        let indices: Vec<usize> = self
            .wave
            .iter()
            .enumerate()
            .filter(|(_, w)| **w >= wmin && **w <= wmax)
            .map(|(i, _)| i)
            .collect();

        let wave = indices.iter().map(|&i| self.wave[i]).collect();
        let intens = indices.iter().map(|&i| self.intens[i]).collect();
        let error = self
            .error
            .as_ref()
            .map(|e| indices.iter().map(|&i| e[i]).collect());
        Ok((wave, intens, error))
    }

    /// Keep a random subset of `ceil(frac * n)` pixels drawn with replacement
    ///
    /// The surviving pixels stay in wavelength order. Fractions at or above
    /// one leave the spectrum untouched.
    pub fn select_random_subset<R: Rng + ?Sized>(&mut self, frac: f64, rng: &mut R) {
        let npixel = self.wave.len();
        let newlength = (frac * npixel as f64).ceil() as usize;
        if newlength >= npixel || newlength == 0 {
            return;
        }

        let mut indices: Vec<usize> = (0..newlength).map(|_| rng.gen_range(0..npixel)).collect();
        indices.sort_unstable();

        self.wave = indices.iter().map(|&i| self.wave[i]).collect();
        self.intens = indices.iter().map(|&i| self.intens[i]).collect();
        if let Some(error) = self.error.as_ref() {
            self.error = Some(indices.iter().map(|&i| error[i]).collect());
        }
    }

    /// Estimate the noise from the scatter of a continuum window
    ///
    /// Returns the sample standard deviation of the intensities inside
    /// `[cmin, cmax]`; with `store` it becomes the global error.
    pub fn sigma_from_continuum(&mut self, cmin: f64, cmax: f64, store: bool) -> Result<f64> {
        let (_, intens, _) = self.get_spectrum(cmin, cmax)?;
        if intens.len() < 2 {
            return Err(SpecFitError::DataMismatch(format!(
                "continuum window ({}, {}) holds fewer than two pixels",
                cmin, cmax
            )));
        }

        let stddev = intens.std(1.0);
        if store {
            self.set_global_error(stddev)?;
        }
        Ok(stddev)
    }

    /// Explicit groups requested for `name`
    pub fn group(&self, name: &str) -> Option<&[GroupId]> {
        self.groups.get(name).map(|g| g.as_slice())
    }

    /// Short label used in messages
    pub fn label(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("<{} pixels>", self.wave.len()))
    }
}

impl fmt::Display for ObservedSpectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (wmin, wmax) = self.bounds();
        write!(
            f,
            "filename: {} component: {} korel: {} wmin: {} wmax: {} global_error: {} groups: {:?}",
            self.label(),
            self.component,
            self.korel,
            wmin,
            wmax,
            self.global_error
                .map_or_else(|| "none".to_string(), |e| e.to_string()),
            self.groups
        )
    }
}

/// Error bars must be positive and finite
fn check_error(error: f64) -> Result<()> {
    if error > 0.0 && error.is_finite() {
        Ok(())
    } else {
        Err(SpecFitError::Configuration(format!(
            "error bars must be positive and finite, got {}",
            error
        )))
    }
}
