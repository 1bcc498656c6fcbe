//! Engine configuration.
//!
//! Settings that shape a fitting session but are not part of the model:
//! how comparisons are enumerated, where iteration logs and chains go, and
//! the random seed. Every field has a default, so an empty JSON object is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::comparison::EnumerationMode;
use crate::error::Result;
use crate::fitter::DEFAULT_FLUSH_EVERY;
use crate::regions::BOUNDS_TOLERANCE;

/// Configuration of an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Enumeration of group contexts. Default: radial velocity groups
    pub mode: EnumerationMode,

    /// Iteration log written during fits. Default: none
    pub iteration_log: Option<PathBuf>,

    /// Chain file of the ensemble sampler. Default: none
    pub chain_file: Option<PathBuf>,

    /// Evaluations buffered before the iteration log is written. Default: 1000
    pub flush_every: usize,

    /// Whether fits write the iteration log at all. Default: true
    pub log_iterations: bool,

    /// Tolerance when matching region boundaries. Default: 1e-6
    pub region_tolerance: f64,

    /// Seed of every stochastic routine. Default: none (entropy)
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EnumerationMode::default(),
            iteration_log: None,
            chain_file: None,
            flush_every: DEFAULT_FLUSH_EVERY,
            log_iterations: true,
            region_tolerance: BOUNDS_TOLERANCE,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: EnumerationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_iteration_log<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.iteration_log = Some(path.into());
        self
    }

    pub fn with_chain_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.chain_file = Some(path.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse a configuration from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Iteration log path if logging is enabled
    pub fn effective_iteration_log(&self) -> Option<&Path> {
        if self.log_iterations {
            self.iteration_log.as_deref()
        } else {
            None
        }
    }
}
