//! Integration tests for the fitter and the optimizer backends

// Fitter contract: bounds pre-check, interval starts, keywords
mod fitter_tests;

// Fits run by the orchestrator
mod orchestrated_tests;
