//! Fitter contract checked against parameters taken from a registry.

use crate::test_helpers::two_component_registry;
use ndarray::{array, Array1};
use specfit_rs::fitter::{list_backends, InitialVector};
use specfit_rs::parameters::ParameterUpdate;
use specfit_rs::{Fitter, FitterConfig, ParameterRegistry, SpecFitError};
use std::collections::BTreeMap;

fn registry_with_fitted() -> ParameterRegistry {
    let mut registry = two_component_registry();
    registry
        .update(Some("primary"), "teff", None, &ParameterUpdate::fitted(true))
        .unwrap();
    registry
        .update(Some("secondary"), "rv", None, &ParameterUpdate::bounds(-100.0, 100.0))
        .unwrap();
    registry
        .update(Some("secondary"), "rv", None, &ParameterUpdate::fitted(true))
        .unwrap();
    registry
}

fn bowl(x: &Array1<f64>) -> f64 {
    ((x[0] - 21000.0) / 1000.0).powi(2) + ((x[1] - 40.0) / 10.0).powi(2)
}

#[test]
fn test_scalar_outside_bounds_is_rejected_before_evaluation() {
    let registry = registry_with_fitted();
    let mut fitter = Fitter::choose("nelder_mead_bounded", &registry.fitted(), None, BTreeMap::new()).unwrap();

    let mut calls = 0;
    let mut objective = |x: &Array1<f64>| -> specfit_rs::Result<f64> {
        calls += 1;
        Ok(bowl(x))
    };
    let result = fitter.optimize(&mut objective, &InitialVector::Values(array![20000.0, 150.0]));

    assert!(matches!(result, Err(SpecFitError::BoundsViolation(_))));
    assert_eq!(calls, 0);
}

#[test]
fn test_population_backend_starts_from_intervals() {
    let registry = registry_with_fitted();
    let config = FitterConfig::new("differential_evolution")
        .with_keyword("maxiter", 40.0)
        .with_seed(17);
    let mut fitter = Fitter::from_config(config, &registry.fitted(), None).unwrap();

    let initial = fitter.initial_vector(&registry.fitted_values());
    assert_eq!(
        initial,
        InitialVector::Intervals(vec![(6000.0, 50000.0), (-100.0, 100.0)])
    );

    let mut outside = 0;
    let mut objective = |x: &Array1<f64>| -> specfit_rs::Result<f64> {
        if !(6000.0..=50000.0).contains(&x[0]) || !(-100.0..=100.0).contains(&x[1]) {
            outside += 1;
        }
        Ok(bowl(x))
    };
    let result = fitter.optimize(&mut objective, &initial).unwrap();

    assert_eq!(outside, 0);
    assert_eq!(result.backend, "differential_evolution");
    assert!(result.chi2 < bowl(&array![20000.0, 0.0]));
}

#[test]
fn test_scalar_start_is_refused_by_population_backend() {
    let registry = registry_with_fitted();
    let mut fitter =
        Fitter::choose("differential_evolution", &registry.fitted(), None, BTreeMap::new()).unwrap();
    let mut objective = |x: &Array1<f64>| -> specfit_rs::Result<f64> { Ok(bowl(x)) };

    let result = fitter.optimize(&mut objective, &InitialVector::Values(array![20000.0, 0.0]));
    assert!(matches!(result, Err(SpecFitError::Configuration(_))));
}

#[test]
fn test_keywords_are_checked_per_backend() {
    let registry = registry_with_fitted();
    let fitted = registry.fitted();

    let foreign = BTreeMap::from([("popsize".to_string(), 10.0)]);
    assert!(matches!(
        Fitter::choose("nelder_mead", &fitted, None, foreign),
        Err(SpecFitError::Configuration(_))
    ));

    let fractional = BTreeMap::from([("maxiter".to_string(), 2.5)]);
    assert!(matches!(
        Fitter::choose("simulated_annealing", &fitted, None, fractional),
        Err(SpecFitError::Configuration(_))
    ));

    assert!(matches!(
        Fitter::choose("nelder_mead", &fitted, Some(array![1.0]), BTreeMap::new()),
        Err(SpecFitError::DataMismatch(_))
    ));
}

#[test]
fn test_every_backend_minimizes_the_bowl() {
    let registry = registry_with_fitted();
    let start = bowl(&registry.fitted_values());

    for descriptor in list_backends() {
        let mut keywords = BTreeMap::new();
        if descriptor.name == "ensemble_sampler" {
            keywords.insert("niter".to_string(), 50.0);
        }
        let config = FitterConfig {
            keywords,
            ..FitterConfig::new(descriptor.name).with_seed(3)
        };
        let mut fitter = Fitter::from_config(config, &registry.fitted(), None).unwrap();
        let initial = fitter.initial_vector(&registry.fitted_values());

        let mut objective = |x: &Array1<f64>| -> specfit_rs::Result<f64> { Ok(bowl(x)) };
        let result = fitter.optimize(&mut objective, &initial).unwrap();
        assert!(result.chi2 <= start, "{} ended at {}", descriptor.name, result.chi2);
        assert_eq!(result.params.len(), 2);
    }
}
