//! # Observed Spectra
//!
//! [`ObservedSpectrum`] holds one spectrum with its error bars, component tag
//! and explicit group assignment. [`ObservationSet`] collects spectra,
//! resolves the groups of every spectrum and answers [`Query`]s used when
//! comparisons are enumerated.

pub mod set;
pub mod spectrum;

pub use set::{GroupAssignment, ObservationSet, Query};
pub use spectrum::{ObservedSpectrum, EDGE_TOLERANCE};
