//! Example of fitting a double-lined binary.
//!
//! Two components are observed together in four epochs. The radial
//! velocities are first refined epoch by epoch, then the effective
//! temperatures are fitted with differential evolution, and finally the
//! session is saved next to a table of radial velocities.
//!
//! Run with `RUST_LOG=info` to follow the fits.

use ndarray::Array1;
use specfit_rs::parameters::ParameterUpdate;
use specfit_rs::synthetic::{ParameterValues, SyntheticSpectrum, Synthesizer, Wavelengths};
use specfit_rs::{EngineConfig, ObservationSet, ObservedSpectrum, Orchestrator, ParameterRegistry, RegionSet};
use std::collections::BTreeMap;
use std::error::Error;
use std::time::Instant;

const C: f64 = 299_792.458;

/// A single absorption line per region
#[derive(Debug)]
struct Line {
    center: f64,
    depth: f64,
    width: f64,
}

impl Line {
    fn evaluate(&self, wave: &Array1<f64>, rv: f64, lr: f64) -> Array1<f64> {
        let center = self.center * (1.0 + rv / C);
        wave.mapv(|w| lr * (1.0 - self.depth * (-0.5 * ((w - center) / self.width).powi(2)).exp()))
    }
}

impl SyntheticSpectrum for Line {
    fn spectrum(
        &self,
        direct: &ParameterValues,
        wavelengths: Wavelengths<'_>,
        _korel: bool,
        _fwhm: f64,
    ) -> specfit_rs::Result<Array1<f64>> {
        let wave = match wavelengths {
            Wavelengths::Vector(wave) => wave.clone(),
            Wavelengths::Bounds(wmin, wmax) => Array1::linspace(wmin, wmax, 500),
        };
        let rv = direct.get("rv").copied().unwrap_or(0.0);
        let lr = direct.get("lr").copied().unwrap_or(1.0);
        Ok(self.evaluate(&wave, rv, lr))
    }
}

/// Stands in for an interpolator over a grid of stellar atmospheres
struct ToyGrid;

impl ToyGrid {
    fn line(component: &str, parameters: &ParameterValues, wmin: f64, wmax: f64) -> Line {
        let offset = if component == "primary" { -2.5 } else { 2.5 };
        Line {
            center: 0.5 * (wmin + wmax) + offset,
            depth: parameters.get("teff").copied().unwrap_or(10000.0) / 60000.0,
            width: parameters.get("logg").copied().unwrap_or(4.0) / 3.0,
        }
    }
}

impl Synthesizer for ToyGrid {
    fn synthesize(
        &mut self,
        component: &str,
        parameters: &ParameterValues,
        wmin: f64,
        wmax: f64,
    ) -> specfit_rs::Result<Box<dyn SyntheticSpectrum>> {
        Ok(Box::new(Self::line(component, parameters, wmin, wmax)))
    }
}

fn observe(epoch: usize, rv_primary: f64, rv_secondary: f64) -> specfit_rs::Result<ObservedSpectrum> {
    let wave = Array1::linspace(4290.0, 4510.0, 2201);
    let mut intens = Array1::<f64>::zeros(wave.len());
    for (component, teff, lr, rv) in [("primary", 28000.0, 0.6, rv_primary), ("secondary", 18000.0, 0.4, rv_secondary)] {
        let grid = ParameterValues::from([("teff".to_string(), teff), ("logg".to_string(), 4.2)]);
        let mut flux = Array1::from_elem(wave.len(), lr);
        for (wmin, wmax) in [(4300.0, 4380.0), (4460.0, 4500.0)] {
            flux = flux + ToyGrid::line(component, &grid, wmin, wmax).evaluate(&wave, rv, lr) - lr;
        }
        intens = intens + flux;
    }

    ObservedSpectrum::new(wave, intens)?
        .with_filename(&format!("epoch{}.dat", epoch))
        .with_hjd(2456000.0 + 1.7 * epoch as f64)
        .with_global_error(0.005)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let velocities = [(45.0, -70.0), (-30.0, 55.0), (10.0, -12.0), (-52.0, 80.0)];
    let spectra = velocities
        .iter()
        .enumerate()
        .map(|(i, (p, s))| observe(i, *p, *s))
        .collect::<specfit_rs::Result<Vec<_>>>()?;
    let observations = ObservationSet::from_spectra(spectra)?;

    let mut registry = ParameterRegistry::new();
    let start = BTreeMap::from([("teff".to_string(), 22000.0), ("logg".to_string(), 4.2)]);
    registry.add_component("primary", &start)?;
    registry.add_component("secondary", &start)?;

    let mut regions = RegionSet::new();
    regions.add_region("all", Some("hgamma"), 4300.0, 4380.0, BTreeMap::new())?;
    regions.add_region("all", Some("hei4471"), 4460.0, 4500.0, BTreeMap::new())?;

    let mut session = Orchestrator::new(registry, ToyGrid)
        .with_config(EngineConfig::new().with_seed(42))
        .with_observations(observations)
        .with_regions(regions);
    let count = session.setup()?;
    println!("Set up {} comparisons", count);

    session.set_parameter(None, "rv", None, &ParameterUpdate::bounds(-150.0, 150.0))?;
    session.set_parameter(Some("primary"), "lr", None, &ParameterUpdate::value(0.6))?;
    session.set_parameter(Some("secondary"), "lr", None, &ParameterUpdate::value(0.4))?;
    println!("Initial chi2: {:.3}", session.current_chi2()?);

    // Radial velocities, one epoch at a time
    let timer = Instant::now();
    for (group, result) in session.optimize_rv(None)? {
        println!("Epoch {}: chi2 = {:.3} ({} evaluations)", group, result.chi2, result.func_evals);
    }
    println!("Radial velocities refined in {:?}", timer.elapsed());

    // Temperatures over the whole grid range
    session.set_parameter(None, "teff", None, &ParameterUpdate::fitted(true))?;
    let keywords = BTreeMap::from([("maxiter".to_string(), 80.0)]);
    session.choose_fitter("differential_evolution", None, keywords)?;
    let result = session.run_fit(None)?;
    println!("{}", result);

    for component in ["primary", "secondary"] {
        let teff = session.registry().get(component, "teff", 0)?;
        println!("{} teff = {:.0} K", component, teff.value());
    }
    let summary = session.chi_square()?;
    println!(
        "chi2 = {:.3}, dof = {}, reduced = {:.3}",
        summary.chi2,
        summary.degrees_of_freedom,
        summary.reduced.unwrap_or(f64::NAN)
    );

    let dir = std::env::temp_dir();
    session.write_rvs(dir.join("two_component_fit.rvs"))?;
    session.save(dir.join("two_component_fit.json"))?;
    println!("Results written to {}", dir.display());

    Ok(())
}
