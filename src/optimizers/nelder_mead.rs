//! Nelder-Mead downhill simplex.
//!
//! Derivative-free local minimization. The initial simplex is spanned by the
//! starting point and one step along each axis. With bounds, every vertex is
//! clipped into the box before it is evaluated.

use ndarray::Array1;

use crate::error::{Result, SpecFitError};
use crate::optimizers::{argmin, clip_to_bounds, BackendResult, Objective};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Downhill simplex minimizer
#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Absolute spread of the simplex vertices at convergence
    pub xtol: f64,

    /// Absolute spread of the objective over the simplex at convergence
    pub ftol: f64,

    /// Maximum number of iterations, `200 * n` when unset
    pub max_iterations: Option<usize>,

    /// Maximum number of function evaluations, `200 * n` when unset
    pub max_evaluations: Option<usize>,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            max_iterations: None,
            max_evaluations: None,
        }
    }
}

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerances(mut self, xtol: f64, ftol: f64) -> Self {
        self.xtol = xtol;
        self.ftol = ftol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }

    /// Minimize `objective` starting from `x0`
    ///
    /// # Arguments
    ///
    /// * `objective` - Function to minimize
    /// * `x0` - Starting point
    /// * `step` - Initial simplex edge along each axis
    /// * `bounds` - Box every vertex is clipped into, if any
    ///
    /// # Returns
    ///
    /// * The best vertex of the final simplex and its cost
    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        x0: &Array1<f64>,
        step: &Array1<f64>,
        bounds: Option<&[(f64, f64)]>,
    ) -> Result<BackendResult> {
        let n = x0.len();
        if n == 0 {
            return Err(SpecFitError::DataMismatch(
                "cannot minimize over zero dimensions".to_string(),
            ));
        }
        if step.len() != n || bounds.map_or(false, |b| b.len() != n) {
            return Err(SpecFitError::DataMismatch(format!(
                "expected {} steps and bounds for the starting point",
                n
            )));
        }

        let max_iterations = self.max_iterations.unwrap_or(200 * n);
        let max_evaluations = self.max_evaluations.unwrap_or(200 * n);
        let project = |x: Array1<f64>| match bounds {
            Some(b) => clip_to_bounds(&x, b),
            None => x,
        };

        let mut simplex: Vec<Array1<f64>> = Vec::with_capacity(n + 1);
        simplex.push(project(x0.clone()));
        for i in 0..n {
            let mut vertex = x0.clone();
            vertex[i] += if step[i] != 0.0 { step[i] } else { 0.00025 };
            simplex.push(project(vertex));
        }

        let mut costs = Vec::with_capacity(n + 1);
        for vertex in &simplex {
            costs.push(objective.evaluate(vertex)?);
        }
        let mut func_evals = n + 1;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < max_iterations && func_evals < max_evaluations {
            order(&mut simplex, &mut costs);

            let x_spread = simplex[1..]
                .iter()
                .flat_map(|v| (v - &simplex[0]).mapv(f64::abs).into_iter())
                .fold(0.0, f64::max);
            let f_spread = costs[1..]
                .iter()
                .map(|c| (c - costs[0]).abs())
                .fold(0.0, f64::max);
            if x_spread <= self.xtol && f_spread <= self.ftol {
                converged = true;
                break;
            }

            let centroid = simplex[..n]
                .iter()
                .fold(Array1::zeros(n), |acc, v| acc + v)
                / n as f64;
            let worst = &simplex[n];

            let reflected = project(&centroid + &((&centroid - worst) * REFLECTION));
            let f_reflected = objective.evaluate(&reflected)?;
            func_evals += 1;

            if f_reflected < costs[0] {
                let expanded = project(&centroid + &((&reflected - &centroid) * EXPANSION));
                let f_expanded = objective.evaluate(&expanded)?;
                func_evals += 1;
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    costs[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    costs[n] = f_reflected;
                }
            } else if f_reflected < costs[n - 1] {
                simplex[n] = reflected;
                costs[n] = f_reflected;
            } else {
                let (contracted, outside) = if f_reflected < costs[n] {
                    (project(&centroid + &((&reflected - &centroid) * CONTRACTION)), true)
                } else {
                    (project(&centroid + &((worst - &centroid) * CONTRACTION)), false)
                };
                let f_contracted = objective.evaluate(&contracted)?;
                func_evals += 1;

                let limit = if outside { f_reflected } else { costs[n] };
                if f_contracted <= limit {
                    simplex[n] = contracted;
                    costs[n] = f_contracted;
                } else {
                    let best = simplex[0].clone();
                    for i in 1..=n {
                        simplex[i] = project(&best + &((&simplex[i] - &best) * SHRINK));
                        costs[i] = objective.evaluate(&simplex[i])?;
                    }
                    func_evals += n;
                }
            }

            iterations += 1;
        }

        let best = argmin(&costs);
        let message = if converged {
            format!("Converged after {} iterations", iterations)
        } else if func_evals >= max_evaluations {
            format!("Reached maximum number of function evaluations: {}", max_evaluations)
        } else {
            format!("Reached maximum number of iterations: {}", max_iterations)
        };

        Ok(BackendResult {
            params: simplex[best].clone(),
            cost: costs[best],
            iterations,
            func_evals,
            success: converged,
            message,
        })
    }
}

/// Sort vertices by ascending cost.
fn order(simplex: &mut Vec<Array1<f64>>, costs: &mut Vec<f64>) {
    let mut idx: Vec<usize> = (0..costs.len()).collect();
    idx.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
    *simplex = idx.iter().map(|&i| simplex[i].clone()).collect();
    *costs = idx.iter().map(|&i| costs[i]).collect();
}
