//! Simulated annealing.
//!
//! A random walk from a starting point whose acceptance of uphill moves
//! shrinks as the temperature cools geometrically.

use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::error::{Result, SpecFitError};
use crate::optimizers::{clip_to_bounds, make_rng, BackendResult, Objective};

/// Simulated annealing minimizer.
#[derive(Debug, Clone)]
pub struct SimulatedAnnealing {
    /// Initial temperature
    pub initial_temp: f64,

    /// Cooling rate
    pub cooling_rate: f64,

    /// Step size as a fraction of each parameter's range
    pub step_size: f64,

    /// Maximum number of iterations
    pub max_iterations: usize,

    /// Maximum number of iterations without improvement
    pub max_no_improvement: usize,

    /// Seed of the random generator
    pub seed: Option<u64>,
}

impl Default for SimulatedAnnealing {
    fn default() -> Self {
        Self {
            initial_temp: 100.0,
            cooling_rate: 0.95,
            step_size: 0.1,
            max_iterations: 1000,
            max_no_improvement: 200,
            seed: None,
        }
    }
}

impl SimulatedAnnealing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new SimulatedAnnealing optimizer with custom parameters.
    ///
    /// # Arguments
    ///
    /// * `initial_temp` - Initial temperature
    /// * `cooling_rate` - Cooling rate (0.9-0.99 is typical)
    /// * `step_size` - Step size for perturbations
    pub fn with_params(initial_temp: f64, cooling_rate: f64, step_size: f64) -> Self {
        Self {
            initial_temp,
            cooling_rate,
            step_size,
            ..Self::default()
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Run the annealing from `x0` inside `bounds`.
    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x0: &Array1<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<BackendResult> {
        if x0.len() != bounds.len() {
            return Err(SpecFitError::DataMismatch(format!(
                "Expected {} bounds for parameters, got {}",
                x0.len(),
                bounds.len()
            )));
        }
        if !(self.cooling_rate > 0.0 && self.cooling_rate < 1.0) {
            return Err(SpecFitError::Configuration(format!(
                "cooling rate must lie in (0, 1), got {}",
                self.cooling_rate
            )));
        }

        let mut rng = make_rng(self.seed);

        let mut current = clip_to_bounds(x0, bounds);
        let mut current_cost = objective.evaluate(&current)?;
        let mut best = current.clone();
        let mut best_cost = current_cost;

        let mut temperature = self.initial_temp;
        let mut iterations = 0;
        let mut no_improvement = 0;
        let mut func_evals = 1;

        while iterations < self.max_iterations && no_improvement < self.max_no_improvement {
            let candidate = self.perturb_solution(&current, bounds, &mut rng);
            let candidate_cost = objective.evaluate(&candidate)?;
            func_evals += 1;

            let cost_diff = candidate_cost - current_cost;
            let accept = if cost_diff <= 0.0 {
                true
            } else {
                rng.gen::<f64>() < (-cost_diff / temperature).exp()
            };

            if accept {
                current = candidate;
                current_cost = candidate_cost;
                if current_cost < best_cost {
                    best = current.clone();
                    best_cost = current_cost;
                    no_improvement = 0;
                } else {
                    no_improvement += 1;
                }
            } else {
                no_improvement += 1;
            }

            temperature *= self.cooling_rate;
            iterations += 1;
        }

        let success = no_improvement >= self.max_no_improvement;
        let message = if success {
            format!(
                "Stopped after {} iterations without improvement",
                self.max_no_improvement
            )
        } else {
            format!("Reached maximum number of iterations: {}", self.max_iterations)
        };

        Ok(BackendResult {
            params: best,
            cost: best_cost,
            iterations,
            func_evals,
            success,
            message,
        })
    }

    fn perturb_solution(
        &self,
        solution: &Array1<f64>,
        bounds: &[(f64, f64)],
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let mut new_solution = solution.clone();

        for (value, &(min, max)) in new_solution.iter_mut().zip(bounds.iter()) {
            let range = if min.is_finite() && max.is_finite() {
                max - min
            } else {
                10.0
            };
            let step = range * self.step_size;
            if step > 0.0 {
                *value += Uniform::new(-step, step).sample(rng);
            }
        }

        clip_to_bounds(&new_solution, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_finds_parabola_minimum() {
        let mut objective = |x: &Array1<f64>| -> Result<f64> {
            Ok((x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2))
        };
        let bounds = [(-5.0, 5.0), (-5.0, 5.0)];
        let sa = SimulatedAnnealing::with_params(1.0, 0.99, 0.05)
            .with_max_iterations(5000)
            .with_seed(11);
        let result = sa.minimize(&mut objective, &array![0.0, 0.0], &bounds).unwrap();

        assert!(result.cost < 0.05);
        assert!((result.params[0] - 2.0).abs() < 0.25);
        assert!((result.params[1] + 1.0).abs() < 0.25);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let bounds = [(-1.0, 1.0)];
        let run = || {
            let mut objective = |x: &Array1<f64>| -> Result<f64> { Ok(x[0].powi(2)) };
            SimulatedAnnealing::new()
                .with_max_iterations(100)
                .with_seed(3)
                .minimize(&mut objective, &array![0.9], &bounds)
                .unwrap()
        };
        assert_eq!(run().params, run().params);
    }

    #[test]
    fn test_stays_within_bounds() {
        let mut objective = |x: &Array1<f64>| -> Result<f64> {
            assert!(x[0] >= 0.0 && x[0] <= 1.0);
            Ok(-x[0])
        };
        let result = SimulatedAnnealing::new()
            .with_seed(5)
            .minimize(&mut objective, &array![0.5], &[(0.0, 1.0)])
            .unwrap();
        assert!(result.params[0] > 0.9);
    }

    #[test]
    fn test_bad_cooling_rate() {
        let mut objective = |x: &Array1<f64>| -> Result<f64> { Ok(x[0]) };
        let sa = SimulatedAnnealing::with_params(1.0, 1.5, 0.1);
        assert!(matches!(
            sa.minimize(&mut objective, &array![0.0], &[(0.0, 1.0)]),
            Err(SpecFitError::Configuration(_))
        ));
    }
}
