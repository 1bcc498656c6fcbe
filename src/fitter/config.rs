use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default number of evaluations buffered before the iteration log is written
pub const DEFAULT_FLUSH_EVERY: usize = 1000;

fn default_flush_every() -> usize {
    DEFAULT_FLUSH_EVERY
}

/// Everything needed to recreate a fitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Name of the backend in the registration table
    pub backend: String,

    /// Backend keywords, checked against the backend's permitted set
    #[serde(default)]
    pub keywords: BTreeMap<String, f64>,

    /// Iteration log, none to skip logging
    #[serde(default)]
    pub iteration_log: Option<PathBuf>,

    /// Chain file of the ensemble sampler
    #[serde(default)]
    pub chain_file: Option<PathBuf>,

    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    #[serde(default)]
    pub seed: Option<u64>,
}

impl FitterConfig {
    pub fn new(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            keywords: BTreeMap::new(),
            iteration_log: None,
            chain_file: None,
            flush_every: DEFAULT_FLUSH_EVERY,
            seed: None,
        }
    }

    pub fn with_keyword(mut self, key: &str, value: f64) -> Self {
        self.keywords.insert(key.to_string(), value);
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
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self::new("nelder_mead_bounded")
    }
}
