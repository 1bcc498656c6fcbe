//! Chi-square evaluation through the orchestrator.

use crate::test_helpers::{composite, composite_spectrum, two_component_registry, two_regions, ToySynthesizer, REGIONS};
use approx::assert_relative_eq;
use ndarray::{array, Array1};
use specfit_rs::parameters::ParameterUpdate;
use specfit_rs::{ObservationSet, ObservedSpectrum, Orchestrator, SpecFitError};

fn session(rvs: &[(f64, f64)]) -> Orchestrator<ToySynthesizer> {
    let spectra = rvs
        .iter()
        .enumerate()
        .map(|(i, rv)| composite_spectrum(&format!("epoch{}.dat", i), 4290.0, 4510.0, *rv));
    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(ObservationSet::from_spectra(spectra).unwrap())
        .with_regions(two_regions());
    session.setup().unwrap();
    session
}

#[test]
fn test_chi2_without_error_bars_is_a_state_error() {
    let wave = Array1::linspace(4290.0, 4510.0, 881);
    let intens = composite(&wave, 0.0, 0.0);
    let spectrum = ObservedSpectrum::new(wave, intens).unwrap().with_filename("bare.dat");

    let mut session = Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(ObservationSet::from_spectra(vec![spectrum]).unwrap())
        .with_regions(two_regions());
    session.setup().unwrap();

    assert!(matches!(session.current_chi2(), Err(SpecFitError::State(_))));
}

#[test]
fn test_chi2_vanishes_at_the_true_parameters() {
    let session = session(&[(0.0, 0.0), (0.0, 0.0)]);
    assert_relative_eq!(session.current_chi2().unwrap(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_chi2_is_idempotent() {
    let mut session = session(&[(20.0, -20.0)]);
    session
        .set_parameter(Some("primary"), "teff", None, &ParameterUpdate::fitted(true))
        .unwrap();
    session
        .set_parameter(Some("secondary"), "rv", None, &ParameterUpdate::fitted(true))
        .unwrap();

    let vector = array![21000.0, -15.0];
    let first = session.compute_chi2(&vector, None).unwrap();
    let second = session.compute_chi2(&vector, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(session.current_chi2().unwrap(), first);
}

#[test]
fn test_chi2_drops_at_the_true_velocities() {
    let mut session = session(&[(30.0, -30.0)]);
    let before = session.current_chi2().unwrap();

    session
        .set_parameter(Some("primary"), "rv", Some(0), &ParameterUpdate::value(30.0))
        .unwrap();
    session
        .set_parameter(Some("secondary"), "rv", Some(0), &ParameterUpdate::value(-30.0))
        .unwrap();

    assert!(before > 1.0);
    assert_relative_eq!(session.current_chi2().unwrap(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_degrees_of_freedom_count_observed_pixels() {
    let mut session = session(&[(0.0, 0.0), (0.0, 0.0)]);
    session.set_parameter(None, "rv", None, &ParameterUpdate::fitted(true)).unwrap();

    let pixels: usize = session
        .observations()
        .iter()
        .map(|spectrum| {
            REGIONS
                .iter()
                .map(|(wmin, wmax)| {
                    spectrum
                        .wave()
                        .iter()
                        .filter(|w| **w >= wmin - 1e-6 && **w <= wmax + 1e-6)
                        .count()
                })
                .sum::<usize>()
        })
        .sum();

    let summary = session.chi_square().unwrap();
    assert_eq!(summary.degrees_of_freedom, pixels as i64 - 4);
    assert!(summary.reduced.unwrap() < 1e-9);
}

#[test]
fn test_topology_change_requires_setup() {
    let mut session = session(&[(0.0, 0.0)]);
    session
        .registry_mut()
        .clone_parameter("primary", "teff", 0, 1, &ParameterUpdate::value(25000.0))
        .unwrap();
    assert!(matches!(session.current_chi2(), Err(SpecFitError::State(_))));
    assert!(matches!(
        session.compute_chi2(&Array1::zeros(0), None),
        Err(SpecFitError::State(_))
    ));

    session.setup().unwrap();
    assert_eq!(session.registry().defined_groups(Some("primary"), "teff"), vec![0, 1]);
    assert_relative_eq!(session.current_chi2().unwrap(), 0.0, epsilon = 1e-9);
}
