//! # specfit-rs
//!
//! `specfit-rs` fits model spectra of several stellar components to observed
//! spectra from several epochs by minimizing chi-square.
//!
//! The library provides:
//! - A registry of grouped physical parameters with bounds and fitted flags
//! - Observed spectra, wavelength regions and the group bookkeeping that
//!   decides which parameter instance applies to which comparison
//! - A comparison engine that turns an optimizer vector into a chi-square
//! - Local, global and ensemble-sampling optimizer backends behind one
//!   registration table
//! - Radial velocity refinement, bootstrap resampling and JSON sessions
//!
//! Synthetic spectra are produced by an external [`Synthesizer`].
//!
//! ## Basic Usage
//!
//! ```no_run
//! use specfit_rs::{EngineConfig, ObservationSet, ObservedSpectrum, Orchestrator, ParameterRegistry};
//! use specfit_rs::parameters::ParameterUpdate;
//! use specfit_rs::synthetic::Synthesizer;
//! use std::collections::BTreeMap;
//!
//! fn fit<S: Synthesizer>(synthesizer: S) -> specfit_rs::Result<()> {
//!     let mut registry = ParameterRegistry::new();
//!     registry.add_component("primary", &BTreeMap::new())?;
//!     registry.add_component("secondary", &BTreeMap::new())?;
//!
//!     let observations = ObservationSet::from_spectra(vec![
//!         ObservedSpectrum::from_file("epoch1.dat", Some(0.01))?,
//!         ObservedSpectrum::from_file("epoch2.dat", Some(0.01))?,
//!     ])?;
//!
//!     let mut session = Orchestrator::new(registry, synthesizer)
//!         .with_config(EngineConfig::from_json_file("engine.json")?)
//!         .with_observations(observations);
//!     session.setup()?;
//!
//!     session.set_parameter(None, "rv", None, &ParameterUpdate::fitted(true))?;
//!     let result = session.run_fit(None)?;
//!     println!("{}", result);
//!     session.save("fit.json")
//! }
//! ```

pub mod comparison;
pub mod config;
pub mod error;
pub mod fitter;
pub mod observed;
pub mod optimizers;
pub mod orchestrator;
pub mod parameters;
pub mod persist;
pub mod regions;
pub mod synthetic;

// Re-exports for convenience
pub use comparison::{ComparisonEngine, EnumerationMode};
pub use config::EngineConfig;
pub use error::{Result, SpecFitError};
pub use fitter::{FitResult, Fitter, FitterConfig};
pub use observed::{ObservationSet, ObservedSpectrum};
pub use orchestrator::Orchestrator;
pub use parameters::{Parameter, ParameterRegistry};
pub use regions::RegionSet;
pub use synthetic::{SyntheticSpectrum, Synthesizer};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
