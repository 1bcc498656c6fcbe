//! Integration tests for setup and comparison enumeration
//!
//! These tests drive the orchestrator through setup and check the groups and
//! comparisons it produces.

// Two components, two spectra, two regions
mod scenario_tests;

// Chi-square evaluation through the orchestrator
mod chi2_tests;
