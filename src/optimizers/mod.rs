//! Optimization and sampling backends.
//!
//! Every backend minimizes a scalar [`Objective`] (the chi-square). They
//! differ in what they need to start from: local methods take a point and a
//! step, the population search takes a box, and the ensemble sampler takes a
//! box in which its walkers are spread. The uniform calling convention over
//! all of them lives in [`crate::fitter`].

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use crate::error::Result;

/// Scalar function minimized by the backends.
pub trait Objective {
    /// Evaluate the objective at `x`.
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<f64>;
}

impl<F> Objective for F
where
    F: FnMut(&Array1<f64>) -> Result<f64>,
{
    fn evaluate(&mut self, x: &Array1<f64>) -> Result<f64> {
        self(x)
    }
}

/// Result of a backend run.
#[derive(Debug, Clone)]
pub struct BackendResult {
    /// The best parameters found
    pub params: Array1<f64>,

    /// The objective at `params`
    pub cost: f64,

    /// The number of iterations performed
    pub iterations: usize,

    /// The number of function evaluations
    pub func_evals: usize,

    /// Whether the backend met its convergence criterion
    pub success: bool,

    /// A message describing the result
    pub message: String,
}

impl fmt::Display for BackendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

mod differential_evolution;
mod ensemble;
mod nelder_mead;
mod simulated_annealing;

pub use differential_evolution::{DEStrategy, DifferentialEvolution};
pub use ensemble::{ChainSink, EnsembleSampler};
pub use nelder_mead::NelderMead;
pub use simulated_annealing::SimulatedAnnealing;

/// Random generator from an optional seed.
pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Generate a random point within the given bounds.
///
/// Open sides fall back to a window of width 10 next to the finite side.
pub(crate) fn random_point(bounds: &[(f64, f64)], rng: &mut impl Rng) -> Array1<f64> {
    bounds
        .iter()
        .map(|&(min, max)| {
            if min.is_finite() && max.is_finite() {
                if min < max {
                    rng.gen_range(min..max)
                } else {
                    min
                }
            } else if min.is_finite() {
                min + rng.gen::<f64>() * 10.0
            } else if max.is_finite() {
                max - rng.gen::<f64>() * 10.0
            } else {
                rng.gen_range(-10.0..10.0)
            }
        })
        .collect()
}

/// Clip a point to the given bounds.
pub(crate) fn clip_to_bounds(point: &Array1<f64>, bounds: &[(f64, f64)]) -> Array1<f64> {
    let mut clipped = point.clone();
    for (value, &(min, max)) in clipped.iter_mut().zip(bounds.iter()) {
        if *value < min {
            *value = min;
        }
        if *value > max {
            *value = max;
        }
    }
    clipped
}

/// Whether a point lies inside the given bounds.
pub(crate) fn within_bounds(point: &Array1<f64>, bounds: &[(f64, f64)]) -> bool {
    point
        .iter()
        .zip(bounds.iter())
        .all(|(v, &(min, max))| *v >= min && *v <= max)
}

/// Create a population of random points within the given bounds.
pub(crate) fn create_population(
    bounds: &[(f64, f64)],
    pop_size: usize,
    rng: &mut impl Rng,
) -> Vec<Array1<f64>> {
    (0..pop_size).map(|_| random_point(bounds, rng)).collect()
}

/// Evaluate the objective for each point in a population.
pub(crate) fn evaluate_population<O: Objective + ?Sized>(
    objective: &mut O,
    population: &[Array1<f64>],
) -> Result<Vec<f64>> {
    population.iter().map(|point| objective.evaluate(point)).collect()
}

/// Index of the smallest cost; NaN sorts last.
pub(crate) fn argmin(costs: &[f64]) -> usize {
    costs
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
