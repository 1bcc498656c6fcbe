//! Saving and loading whole sessions.

use crate::test_helpers::{composite, two_component_registry, two_regions, write_spectrum, ToySynthesizer};
use approx::assert_relative_eq;
use ndarray::Array1;
use specfit_rs::parameters::ParameterUpdate;
use specfit_rs::{
    EngineConfig, EnumerationMode, ObservationSet, ObservedSpectrum, Orchestrator, Parameter, SpecFitError,
};
use std::collections::BTreeMap;
use std::fs;

type ParameterTuple = (String, String, usize, f64, f64, f64, bool);

fn parameter_tuples(session: &Orchestrator<ToySynthesizer>) -> Vec<ParameterTuple> {
    session
        .registry()
        .iter()
        .map(|p: &Parameter| {
            (
                p.component().to_string(),
                p.name().to_string(),
                p.group(),
                p.value(),
                p.vmin(),
                p.vmax(),
                p.fitted(),
            )
        })
        .collect()
}

type ObservationTuple = (Option<String>, String, bool, Option<f64>, BTreeMap<String, Vec<usize>>);

fn observation_tuples(session: &Orchestrator<ToySynthesizer>) -> Vec<ObservationTuple> {
    let observations = session.observations();
    observations
        .iter()
        .enumerate()
        .map(|(i, s)| {
            (
                s.filename.clone(),
                s.component.clone(),
                s.korel,
                s.global_error(),
                observations.resolved_groups(i).cloned().unwrap_or_default(),
            )
        })
        .collect()
}

#[test]
fn test_save_load_round_trip_with_files() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_spectrum(dir.path(), "epoch1.dat", (20.0, -20.0));
    let second = write_spectrum(dir.path(), "epoch2.dat", (-10.0, 30.0));

    let observations = ObservationSet::from_spectra(vec![
        ObservedSpectrum::from_file(&first, Some(0.01)).unwrap().with_hjd(2456000.5),
        ObservedSpectrum::from_file(&second, Some(0.02)).unwrap().with_group("rv", &[4]),
    ])
    .unwrap();

    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(observations)
        .with_regions(two_regions());
    session.setup().unwrap();
    session
        .set_parameter(None, "rv", None, &ParameterUpdate::bounds(-80.0, 80.0))
        .unwrap();
    session
        .set_parameter(Some("primary"), "rv", Some(4), &ParameterUpdate::value(-10.0))
        .unwrap();
    session
        .set_parameter(Some("secondary"), "teff", None, &ParameterUpdate::fitted(true))
        .unwrap();
    session
        .choose_fitter("differential_evolution", None, BTreeMap::from([("popsize".to_string(), 12.0)]))
        .unwrap();

    let path = dir.path().join("session.json");
    session.save(&path).unwrap();
    let loaded = Orchestrator::load(&path, ToySynthesizer::default(), EngineConfig::default()).unwrap();

    assert_eq!(parameter_tuples(&loaded), parameter_tuples(&session));
    assert_eq!(observation_tuples(&loaded), observation_tuples(&session));
    assert_eq!(loaded.regions().wavelengths(), session.regions().wavelengths());
    assert_eq!(loaded.fitter_config(), session.fitter_config());
    assert_eq!(loaded.observations().spectrum(0).unwrap().hjd, Some(2456000.5));
    assert_eq!(loaded.registry().defined_groups(Some("primary"), "rv"), vec![0, 4]);
    assert_relative_eq!(
        loaded.current_chi2().unwrap(),
        session.current_chi2().unwrap(),
        epsilon = 1e-9
    );
}

#[test]
fn test_unbounded_fit_result_survives_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let spectra = [(40.0, -55.0), (-35.0, 50.0)].iter().enumerate().map(|(i, rv)| {
        let path = write_spectrum(dir.path(), &format!("epoch{}.dat", i), *rv);
        ObservedSpectrum::from_file(&path, Some(0.01)).unwrap()
    });
    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(ObservationSet::from_spectra(spectra).unwrap())
        .with_regions(two_regions());
    session.setup().unwrap();
    session
        .set_parameter(None, "rv", None, &ParameterUpdate::bounds(-10.0, 10.0))
        .unwrap();
    session.set_parameter(None, "rv", None, &ParameterUpdate::fitted(true)).unwrap();
    session
        .choose_fitter("nelder_mead", Some(Array1::from_elem(4, 20.0)), BTreeMap::new())
        .unwrap();
    session.run_fit(None).unwrap();
    let fitted = session.registry().get("primary", "rv", 0).unwrap().value();
    assert!(fitted > 10.0, "unbounded fit stayed at {}", fitted);

    let path = dir.path().join("unbounded.json");
    session.save(&path).unwrap();
    let loaded = Orchestrator::load(&path, ToySynthesizer::default(), EngineConfig::default()).unwrap();

    assert_eq!(parameter_tuples(&loaded), parameter_tuples(&session));
    assert_relative_eq!(
        loaded.current_chi2().unwrap(),
        session.current_chi2().unwrap(),
        epsilon = 1e-9
    );
}

#[test]
fn test_inline_spectra_are_embedded() {
    let wave = Array1::linspace(4290.0, 4510.0, 881);
    let intens = composite(&wave, 5.0, -5.0);
    let spectrum = ObservedSpectrum::new(wave, intens).unwrap().with_global_error(0.01).unwrap();

    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(ObservationSet::from_spectra(vec![spectrum]).unwrap());
    session.setup().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inline.json");
    session.save(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"intens\""));
    assert!(text.contains("\"chi_square\""));

    let loaded = Orchestrator::load(&path, ToySynthesizer::default(), EngineConfig::default()).unwrap();
    assert_eq!(loaded.observations().spectrum(0).unwrap().len(), 881);
    assert_eq!(loaded.regions().len(), 1);
    assert_relative_eq!(
        loaded.current_chi2().unwrap(),
        session.current_chi2().unwrap(),
        epsilon = 1e-9
    );
}

#[test]
fn test_load_with_engine_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("engine.json");
    fs::write(&config_path, r#"{"mode": "all_groups", "seed": 5}"#).unwrap();
    let config = EngineConfig::from_json_file(&config_path).unwrap();

    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default()).with_regions(two_regions());
    session.setup().unwrap();
    assert!(matches!(session.current_chi2(), Err(SpecFitError::State(_))));
    let path = dir.path().join("model.json");
    session.save(&path).unwrap();
    let document: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(document["chi_square"].is_null());

    let loaded = Orchestrator::load(&path, ToySynthesizer::default(), config).unwrap();
    assert_eq!(loaded.config().mode, EnumerationMode::AllGroups);
    assert_eq!(loaded.engine().mode(), EnumerationMode::AllGroups);
    assert_eq!(loaded.config().seed, Some(5));
}

#[test]
fn test_unsupported_format_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default()).with_regions(two_regions());
    session.setup().unwrap();
    let path = dir.path().join("old.json");
    session.save(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap().replace("\"format_version\": 1", "\"format_version\": 99");
    fs::write(&path, text).unwrap();

    let result = Orchestrator::load(&path, ToySynthesizer::default(), EngineConfig::default());
    assert!(matches!(result, Err(SpecFitError::Parse(_))));
}
