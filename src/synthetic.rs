//! Contract of the spectral synthesis collaborator.
//!
//! Synthesis happens in two stages. [`Synthesizer::synthesize`] performs the
//! expensive step (grid interpolation) for one component from the parameters
//! the grid depends on. The returned [`SyntheticSpectrum`] then applies the
//! directly-applied parameters (`rv`, `vrot`, `lr`) and resamples onto the
//! requested wavelengths, which is cheap enough to repeat on every objective
//! evaluation.

use crate::error::Result;
use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt;

/// Parameter values keyed by parameter name.
pub type ParameterValues = BTreeMap<String, f64>;

/// Where a synthetic spectrum is evaluated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wavelengths<'a> {
    /// The native sampling between two wavelengths
    Bounds(f64, f64),

    /// Exactly these wavelengths (the pixels of an observed spectrum)
    Vector(&'a Array1<f64>),
}

/// A synthesized spectrum of one component
pub trait SyntheticSpectrum: fmt::Debug {
    /// Intensities after applying the directly-applied parameters
    ///
    /// # Arguments
    ///
    /// * `direct` - Values of `rv`, `vrot` and `lr`
    /// * `wavelengths` - Sampling of the output
    /// * `korel` - Return a KOREL-style (disentangled) spectrum
    /// * `fwhm` - Instrumental broadening in wavelength units
    fn spectrum(
        &self,
        direct: &ParameterValues,
        wavelengths: Wavelengths<'_>,
        korel: bool,
        fwhm: f64,
    ) -> Result<Array1<f64>>;
}

/// Source of synthetic spectra
pub trait Synthesizer {
    /// Interpolate a spectrum of `component` covering `[wmin, wmax]`
    ///
    /// `parameters` holds only the grid parameters (everything except the
    /// directly-applied ones).
    fn synthesize(
        &mut self,
        component: &str,
        parameters: &ParameterValues,
        wmin: f64,
        wmax: f64,
    ) -> Result<Box<dyn SyntheticSpectrum>>;
}

impl<S: Synthesizer + ?Sized> Synthesizer for Box<S> {
    fn synthesize(
        &mut self,
        component: &str,
        parameters: &ParameterValues,
        wmin: f64,
        wmax: f64,
    ) -> Result<Box<dyn SyntheticSpectrum>> {
        (**self).synthesize(component, parameters, wmin, wmax)
    }
}
