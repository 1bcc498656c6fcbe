//! Differential evolution.
//!
//! A population-based stochastic minimizer over a finite box. Members are
//! perturbed with scaled differences of other members and kept only when the
//! trial improves on them.

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Result, SpecFitError};
use crate::optimizers::{
    argmin, clip_to_bounds, create_population, evaluate_population, make_rng, BackendResult,
    Objective,
};

/// Differential evolution minimizer.
#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    /// Population size multiplier (population size = multiplier * parameter count)
    pub pop_size_multiplier: usize,

    /// Differential weight (F) in range [0, 2]
    pub differential_weight: f64,

    /// Crossover probability (CR) in range [0, 1]
    pub crossover_prob: f64,

    /// Strategy for creating candidate solutions
    pub strategy: DEStrategy,

    /// Relative spread of the population costs at convergence
    pub tol: f64,

    /// Absolute spread of the population costs at convergence
    pub atol: f64,

    /// Generations without improvement of the best member before the
    /// spread test may declare convergence
    pub stall_generations: usize,

    /// Maximum number of generations
    pub max_iterations: usize,

    /// Maximum number of generations without improvement of the best member
    pub max_no_improvement: usize,

    /// Seed of the random generator
    pub seed: Option<u64>,
}

/// Strategies for creating candidate solutions in differential evolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DEStrategy {
    /// DE/rand/1: x_r1 + F * (x_r2 - x_r3)
    Rand1,

    /// DE/rand/2: x_r1 + F * (x_r2 - x_r3) + F * (x_r4 - x_r5)
    Rand2,

    /// DE/best/1: x_best + F * (x_r1 - x_r2)
    Best1,

    /// DE/best/2: x_best + F * (x_r1 - x_r2) + F * (x_r3 - x_r4)
    Best2,

    /// DE/current-to-best/1: x_i + F * (x_best - x_i) + F * (x_r1 - x_r2)
    CurrentToBest1,
}

impl DEStrategy {
    /// Members other than the target (and the best) each trial draws.
    fn donors(self) -> usize {
        match self {
            DEStrategy::Rand1 => 3,
            DEStrategy::Rand2 => 5,
            DEStrategy::Best1 | DEStrategy::CurrentToBest1 => 2,
            DEStrategy::Best2 => 4,
        }
    }
}

impl Default for DifferentialEvolution {
    fn default() -> Self {
        Self {
            pop_size_multiplier: 10,
            differential_weight: 0.8,
            crossover_prob: 0.9,
            strategy: DEStrategy::Best1,
            tol: 0.01,
            atol: 1e-8,
            stall_generations: 10,
            max_iterations: 1000,
            max_no_improvement: 100,
            seed: None,
        }
    }
}

impl DifferentialEvolution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new DifferentialEvolution optimizer with custom parameters.
    ///
    /// # Arguments
    ///
    /// * `pop_size_multiplier` - Population size multiplier (population size = multiplier * parameter count)
    /// * `differential_weight` - Differential weight (F) in range [0, 2]
    /// * `crossover_prob` - Crossover probability (CR) in range [0, 1]
    /// * `strategy` - Strategy for creating candidate solutions
    pub fn with_params(
        pop_size_multiplier: usize,
        differential_weight: f64,
        crossover_prob: f64,
        strategy: DEStrategy,
    ) -> Self {
        Self {
            pop_size_multiplier,
            differential_weight,
            crossover_prob,
            strategy,
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_absolute_tolerance(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Minimize `objective` over a finite box.
    ///
    /// # Arguments
    ///
    /// * `objective` - Function to minimize
    /// * `bounds` - Lower and upper bounds for each parameter
    ///
    /// # Returns
    ///
    /// * The best member of the final population and its cost
    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        bounds: &[(f64, f64)],
    ) -> Result<BackendResult> {
        let n_params = bounds.len();
        if n_params == 0 {
            return Err(SpecFitError::DataMismatch(
                "cannot minimize over zero dimensions".to_string(),
            ));
        }
        if let Some(&(min, max)) = bounds.iter().find(|(min, max)| !min.is_finite() || !max.is_finite()) {
            return Err(SpecFitError::Configuration(format!(
                "differential evolution needs finite bounds, got ({}, {})",
                min, max
            )));
        }
        if !(0.0..=2.0).contains(&self.differential_weight)
            || !(0.0..=1.0).contains(&self.crossover_prob)
        {
            return Err(SpecFitError::Configuration(format!(
                "mutation {} must lie in [0, 2] and recombination {} in [0, 1]",
                self.differential_weight, self.crossover_prob
            )));
        }

        let mut rng = make_rng(self.seed);

        // Every strategy needs enough donors besides the target and the best
        let pop_size = (self.pop_size_multiplier * n_params).max(self.strategy.donors() + 2);
        let mut population = create_population(bounds, pop_size, &mut rng);
        let mut costs = evaluate_population(objective, &population)?;

        let mut best_idx = argmin(&costs);
        let mut best_cost = costs[best_idx];

        let mut iterations = 0;
        let mut no_improvement = 0;
        let mut func_evals = population.len();
        let mut converged = false;

        while iterations < self.max_iterations && no_improvement < self.max_no_improvement {
            let mut improved = false;

            for i in 0..pop_size {
                let trial = self.create_trial_vector(i, best_idx, &population, bounds, &mut rng);
                let trial_cost = objective.evaluate(&trial)?;
                func_evals += 1;

                if trial_cost < costs[i] {
                    population[i] = trial;
                    costs[i] = trial_cost;
                    if trial_cost < best_cost {
                        best_idx = i;
                        best_cost = trial_cost;
                        improved = true;
                    }
                }
            }

            if improved {
                no_improvement = 0;
            } else {
                no_improvement += 1;
            }
            iterations += 1;

            let mean = costs.iter().sum::<f64>() / pop_size as f64;
            let spread = (costs.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / pop_size as f64).sqrt();
            // A large cost floor shrinks the relative spread long before the
            // population reaches the minimum, so the best member must stall too
            if no_improvement >= self.stall_generations && spread <= self.atol + self.tol * mean.abs() {
                converged = true;
                break;
            }
        }

        let message = if converged {
            format!("Population converged after {} generations", iterations)
        } else if no_improvement >= self.max_no_improvement {
            format!(
                "Stopped after {} generations without improvement",
                self.max_no_improvement
            )
        } else {
            format!("Reached maximum number of iterations: {}", self.max_iterations)
        };

        Ok(BackendResult {
            params: population[best_idx].clone(),
            cost: best_cost,
            iterations,
            func_evals,
            success: converged || no_improvement >= self.max_no_improvement,
            message,
        })
    }

    /// Create a trial vector for `target_idx` with the configured strategy.
    fn create_trial_vector(
        &self,
        target_idx: usize,
        best_idx: usize,
        population: &[Array1<f64>],
        bounds: &[(f64, f64)],
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        let n_params = population[target_idx].len();
        let f = self.differential_weight;

        let mut available: Vec<usize> = (0..population.len())
            .filter(|&i| i != target_idx && i != best_idx)
            .collect();
        available.shuffle(rng);
        let r = |k: usize| &population[available[k]];

        let best = &population[best_idx];
        let target = &population[target_idx];

        let mut trial = match self.strategy {
            DEStrategy::Rand1 => r(0) + &((r(1) - r(2)) * f),
            DEStrategy::Rand2 => r(0) + &((r(1) - r(2)) * f) + &((r(3) - r(4)) * f),
            DEStrategy::Best1 => best + &((r(0) - r(1)) * f),
            DEStrategy::Best2 => best + &((r(0) - r(1)) * f) + &((r(2) - r(3)) * f),
            DEStrategy::CurrentToBest1 => {
                target + &((best - target) * f) + &((r(0) - r(1)) * f)
            }
        };

        // Binomial crossover keeps at least one mutated coordinate
        let j_rand = rng.gen_range(0..n_params);
        for j in 0..n_params {
            if rng.gen::<f64>() > self.crossover_prob && j != j_rand {
                trial[j] = target[j];
            }
        }

        clip_to_bounds(&trial, bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::within_bounds;

    fn sphere(x: &Array1<f64>) -> Result<f64> {
        Ok(x.iter().map(|v| (v - 1.0).powi(2)).sum::<f64>() + 1.0)
    }

    #[test]
    fn test_sphere_all_strategies() {
        let bounds = [(-5.0, 5.0), (-5.0, 5.0)];
        for strategy in [
            DEStrategy::Rand1,
            DEStrategy::Rand2,
            DEStrategy::Best1,
            DEStrategy::Best2,
            DEStrategy::CurrentToBest1,
        ] {
            let mut objective = sphere;
            let de = DifferentialEvolution::with_params(10, 0.7, 0.9, strategy)
                .with_tolerance(1e-8)
                .with_max_iterations(300)
                .with_seed(42);
            let result = de.minimize(&mut objective, &bounds).unwrap();
            assert!(
                result.cost < 1.01,
                "{:?} ended at cost {}",
                strategy,
                result.cost
            );
            assert!(within_bounds(&result.params, &bounds));
        }
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let bounds = [(-2.0, 2.0)];
        let run = || {
            let mut objective = sphere;
            DifferentialEvolution::new()
                .with_max_iterations(20)
                .with_seed(9)
                .minimize(&mut objective, &bounds)
                .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.params, b.params);
        assert_eq!(a.func_evals, b.func_evals);
    }

    #[test]
    fn test_cost_floor_does_not_stop_search_early() {
        let mut objective = |x: &Array1<f64>| -> Result<f64> { Ok(1.0e4 + (x[0] - 2.0).powi(2)) };
        let result = DifferentialEvolution::new()
            .with_max_iterations(200)
            .with_seed(5)
            .minimize(&mut objective, &[(-10.0, 10.0)])
            .unwrap();
        assert!((result.params[0] - 2.0).abs() < 0.05, "stopped at {}", result.params[0]);
        assert!(result.iterations > 10);
    }

    #[test]
    fn test_requires_finite_bounds() {
        let mut objective = sphere;
        let result = DifferentialEvolution::new()
            .minimize(&mut objective, &[(0.0, f64::INFINITY)]);
        assert!(matches!(result, Err(SpecFitError::Configuration(_))));
    }

    #[test]
    fn test_small_population_is_padded() {
        let mut calls = 0;
        let mut objective = |x: &Array1<f64>| -> Result<f64> {
            calls += 1;
            Ok(x[0].abs() + 1.0)
        };
        let de = DifferentialEvolution::with_params(1, 0.8, 0.9, DEStrategy::Rand2)
            .with_max_iterations(1)
            .with_seed(1);
        let result = de.minimize(&mut objective, &[(-1.0, 1.0)]).unwrap();
        assert_eq!(result.iterations, 1);
        // Seven members evaluated at start and once more in the generation
        assert_eq!(calls, 14);
    }
}
