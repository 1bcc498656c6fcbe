//! Fits driven by the orchestrator against synthetic composite spectra.

use crate::test_helpers::{composite_spectrum, two_component_registry, two_regions, ToySynthesizer};
use approx::assert_relative_eq;
use ndarray::Array1;
use specfit_rs::parameters::ParameterUpdate;
use specfit_rs::{EngineConfig, ObservationSet, Orchestrator, SpecFitError};
use std::collections::BTreeMap;

const EPOCHS: [(f64, f64); 2] = [(40.0, -55.0), (-35.0, 50.0)];

fn session(config: EngineConfig) -> Orchestrator<ToySynthesizer> {
    let spectra = EPOCHS
        .iter()
        .enumerate()
        .map(|(i, rv)| composite_spectrum(&format!("epoch{}.dat", i), 4290.0, 4510.0, *rv));
    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_config(config)
        .with_observations(ObservationSet::from_spectra(spectra).unwrap())
        .with_regions(two_regions());
    session.setup().unwrap();
    session
        .set_parameter(None, "rv", None, &ParameterUpdate::bounds(-100.0, 100.0))
        .unwrap();
    session
}

fn assert_velocities(session: &Orchestrator<ToySynthesizer>, tolerance: f64) {
    for (group, (primary, secondary)) in EPOCHS.iter().enumerate() {
        let registry = session.registry();
        assert_relative_eq!(registry.get("primary", "rv", group).unwrap().value(), *primary, epsilon = tolerance);
        assert_relative_eq!(registry.get("secondary", "rv", group).unwrap().value(), *secondary, epsilon = tolerance);
    }
}

#[test]
fn test_run_fit_recovers_all_velocities() {
    let mut session = session(EngineConfig::default());
    session.set_parameter(None, "rv", None, &ParameterUpdate::fitted(true)).unwrap();
    session
        .choose_fitter("nelder_mead_bounded", Some(Array1::from_elem(4, 20.0)), BTreeMap::new())
        .unwrap();

    let result = session.run_fit(None).unwrap();

    assert!(result.chi2 < 1.0);
    assert_velocities(&session, 0.5);
    assert_relative_eq!(session.current_chi2().unwrap(), result.chi2, epsilon = 1e-9);
}

#[test]
fn test_optimize_rv_fits_each_epoch_alone() {
    let mut session = session(EngineConfig::default());
    session
        .set_parameter(Some("primary"), "teff", None, &ParameterUpdate::fitted(true))
        .unwrap();

    let results = session.optimize_rv(None).unwrap();

    assert_eq!(results.iter().map(|(g, _)| *g).collect::<Vec<_>>(), vec![0, 1]);
    for (_, result) in &results {
        assert_eq!(result.params.len(), 2);
    }
    assert_velocities(&session, 0.5);
    assert_eq!(session.registry().fitted_count(), 1);
}

#[test]
fn test_run_fit_needs_fitted_parameters() {
    let mut session = session(EngineConfig::default());
    assert!(matches!(session.run_fit(None), Err(SpecFitError::Configuration(_))));
}

#[test]
fn test_accept_fit_refuses_changed_fitted_set() {
    let mut session = session(EngineConfig::default());
    session
        .set_parameter(Some("primary"), "rv", Some(0), &ParameterUpdate::fitted(true))
        .unwrap();
    session.run_fit(None).unwrap();

    session
        .set_parameter(Some("secondary"), "rv", Some(0), &ParameterUpdate::fitted(true))
        .unwrap();
    assert!(matches!(session.accept_fit(), Err(SpecFitError::State(_))));
}

#[test]
fn test_differential_evolution_through_orchestrator() {
    let mut session = session(EngineConfig::new().with_seed(21));
    session
        .set_parameter(Some("primary"), "rv", Some(0), &ParameterUpdate::fitted(true))
        .unwrap();
    let before = session.current_chi2().unwrap();

    let keywords = BTreeMap::from([("maxiter".to_string(), 60.0)]);
    session.choose_fitter("differential_evolution", None, keywords).unwrap();
    let result = session.run_fit(None).unwrap();

    assert!(result.chi2 < before);
    assert_relative_eq!(session.registry().get("primary", "rv", 0).unwrap().value(), 40.0, epsilon = 2.0);
}

#[test]
fn test_iteration_log_and_chain_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("fit.log");
    let chain = dir.path().join("chain.dat");
    let config = EngineConfig::new()
        .with_iteration_log(&log)
        .with_chain_file(&chain)
        .with_seed(8);

    let mut session = session(config);
    session
        .set_parameter(Some("secondary"), "rv", Some(1), &ParameterUpdate::fitted(true))
        .unwrap();

    session.run_fit(None).unwrap();
    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.starts_with("# name: rv"));
    assert!(text.lines().filter(|l| !l.starts_with('#')).count() > 3);

    let value = session.registry().get("secondary", "rv", 1).unwrap().value();
    session.run_mcmc(Some(4), 25).unwrap();
    assert!(chain.exists());
    assert_eq!(session.registry().get("secondary", "rv", 1).unwrap().value(), value);
}
