//! Affine-invariant ensemble sampler (stretch move).
//!
//! Walkers start uniformly inside a finite box and explore the posterior
//! `exp(-chi2 / 2)` restricted to it.
//! Proposals outside the box have zero probability and are rejected without
//! evaluating the objective.

use ndarray::Array1;
use rand::Rng;

use crate::error::{Result, SpecFitError};
use crate::optimizers::{
    clip_to_bounds, create_population, make_rng, within_bounds, BackendResult, Objective,
};

/// Receiver of the walker positions after every step.
pub trait ChainSink {
    /// Record the walkers and their log-probabilities after `step`.
    fn record(&mut self, step: usize, walkers: &[Array1<f64>], log_probs: &[f64]) -> Result<()>;
}

/// Keeps the whole chain in memory.
impl ChainSink for Vec<(usize, Vec<Array1<f64>>, Vec<f64>)> {
    fn record(&mut self, step: usize, walkers: &[Array1<f64>], log_probs: &[f64]) -> Result<()> {
        self.push((step, walkers.to_vec(), log_probs.to_vec()));
        Ok(())
    }
}

/// Ensemble sampler over a finite box.
#[derive(Debug, Clone)]
pub struct EnsembleSampler {
    /// Number of walkers, `4 * n` when unset and at least `2 * n`
    pub nwalkers: Option<usize>,

    /// Number of steps every walker takes
    pub niter: usize,

    /// Stretch scale `a` of the proposal `z ~ g(z) ∝ 1/sqrt(z)` on `[1/a, a]`
    pub scale: f64,

    /// Seed of the random generator
    pub seed: Option<u64>,
}

impl Default for EnsembleSampler {
    fn default() -> Self {
        Self {
            nwalkers: None,
            niter: 500,
            scale: 2.0,
            seed: None,
        }
    }
}

impl EnsembleSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_walkers(mut self, nwalkers: usize) -> Self {
        self.nwalkers = Some(nwalkers);
        self
    }

    pub fn with_iterations(mut self, niter: usize) -> Self {
        self.niter = niter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of walkers used for `n` dimensions.
    pub fn walkers_for(&self, n: usize) -> usize {
        self.nwalkers.unwrap_or(4 * n)
    }

    /// Sample the box and return the most probable position visited.
    ///
    /// `x0` replaces one of the uniformly drawn walkers. The returned cost is
    /// the chi-square at the best position, `-2 * lp`.
    pub fn sample<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x0: &Array1<f64>,
        bounds: &[(f64, f64)],
        mut sink: Option<&mut dyn ChainSink>,
    ) -> Result<BackendResult> {
        let n = x0.len();
        if n == 0 || bounds.len() != n {
            return Err(SpecFitError::DataMismatch(format!(
                "Expected {} bounds for parameters, got {}",
                n,
                bounds.len()
            )));
        }
        if let Some(&(min, max)) = bounds.iter().find(|(min, max)| !min.is_finite() || !max.is_finite()) {
            return Err(SpecFitError::Configuration(format!(
                "the ensemble sampler needs finite bounds, got ({}, {})",
                min, max
            )));
        }
        let nwalkers = self.walkers_for(n);
        if nwalkers < 2 * n {
            return Err(SpecFitError::Configuration(format!(
                "{} walkers are too few for {} dimensions (at least {})",
                nwalkers,
                n,
                2 * n
            )));
        }
        if self.scale <= 1.0 {
            return Err(SpecFitError::Configuration(format!(
                "stretch scale must exceed 1, got {}",
                self.scale
            )));
        }

        let mut rng = make_rng(self.seed);
        let mut func_evals = 0;
        let mut log_prob = |x: &Array1<f64>, evals: &mut usize| -> Result<f64> {
            if !within_bounds(x, bounds) {
                return Ok(f64::NEG_INFINITY);
            }
            *evals += 1;
            Ok(-0.5 * objective.evaluate(x)?)
        };

        let start = clip_to_bounds(x0, bounds);
        let mut walkers = create_population(bounds, nwalkers, &mut rng);
        walkers[0] = start.clone();

        let mut log_probs = Vec::with_capacity(nwalkers);
        for walker in &walkers {
            log_probs.push(log_prob(walker, &mut func_evals)?);
        }

        let mut best = start;
        let mut best_lp = log_probs[0];
        for (walker, &lp) in walkers.iter().zip(log_probs.iter()) {
            if lp > best_lp {
                best = walker.clone();
                best_lp = lp;
            }
        }

        let a = self.scale;
        let mut accepted = 0usize;
        for step in 0..self.niter {
            for k in 0..nwalkers {
                let mut j = rng.gen_range(0..nwalkers - 1);
                if j >= k {
                    j += 1;
                }
                let z = ((a - 1.0) * rng.gen::<f64>() + 1.0).powi(2) / a;
                let proposal = &walkers[j] + &((&walkers[k] - &walkers[j]) * z);
                let lp = log_prob(&proposal, &mut func_evals)?;

                let log_accept = (n as f64 - 1.0) * z.ln() + lp - log_probs[k];
                if lp.is_finite() && rng.gen::<f64>().ln() < log_accept {
                    if lp > best_lp {
                        best = proposal.clone();
                        best_lp = lp;
                    }
                    walkers[k] = proposal;
                    log_probs[k] = lp;
                    accepted += 1;
                }
            }

            if let Some(sink) = sink.as_mut() {
                sink.record(step, &walkers, &log_probs)?;
            }
        }

        let proposals = (self.niter * nwalkers).max(1);
        let acceptance = accepted as f64 / proposals as f64;
        log::debug!(
            "ensemble sampler: {} walkers, {} steps, acceptance {:.3}",
            nwalkers,
            self.niter,
            acceptance
        );

        Ok(BackendResult {
            params: best,
            cost: -2.0 * best_lp,
            iterations: self.niter,
            func_evals,
            success: best_lp.is_finite(),
            message: format!("Sampled {} steps, acceptance fraction {:.3}", self.niter, acceptance),
        })
    }
}
