//! Two components observed in two composite spectra through two regions.

use crate::test_helpers::{composite_spectrum, two_component_registry, two_regions, ToySynthesizer};
use specfit_rs::{EngineConfig, EnumerationMode, ObservationSet, ObservedSpectrum, Orchestrator, SpecFitError};

fn scenario(spectra: Vec<ObservedSpectrum>) -> Orchestrator<ToySynthesizer> {
    Orchestrator::new(two_component_registry(), ToySynthesizer::default())
        .with_observations(ObservationSet::from_spectra(spectra).unwrap())
        .with_regions(two_regions())
}

fn two_epochs(second_wmax: f64) -> Vec<ObservedSpectrum> {
    vec![
        composite_spectrum("epoch1.dat", 4290.0, 4510.0, (0.0, 0.0)),
        composite_spectrum("epoch2.dat", 4290.0, second_wmax, (0.0, 0.0)),
    ]
}

#[test]
fn test_two_components_two_spectra_two_regions() {
    let mut session = scenario(two_epochs(4510.0));
    assert_eq!(session.setup().unwrap(), 4);

    let regions = session.regions();
    assert_eq!(regions.get("region00").unwrap().lr_group(), Some(0));
    assert_eq!(regions.get("region01").unwrap().lr_group(), Some(1));

    for component in ["primary", "secondary"] {
        let registry = session.registry();
        assert_eq!(registry.defined_groups(Some(component), "lr"), vec![0, 1]);
        assert_eq!(registry.defined_groups(Some(component), "rv"), vec![0, 1]);
        assert_eq!(registry.defined_groups(Some(component), "teff"), vec![0]);
    }

    for comparison in session.engine().comparisons() {
        let observed = comparison.observed.as_ref().unwrap();
        let lr = if comparison.region == "region00" { 0 } else { 1 };
        assert_eq!(comparison.components.len(), 2);
        for model in &comparison.components {
            assert_eq!(model.groups["lr"], lr);
            assert_eq!(model.groups["rv"], observed.index);
        }
    }
}

#[test]
fn test_spectrum_missing_a_region_gives_fewer_comparisons() {
    let mut session = scenario(two_epochs(4400.0));
    assert_eq!(session.setup().unwrap(), 3);
    assert!(session
        .engine()
        .comparisons()
        .iter()
        .all(|c| c.region == "region00" || c.observed.as_ref().unwrap().index == 0));
}

#[test]
fn test_auto_rv_groups_are_distinct() {
    let spectra: Vec<_> = (0..4)
        .map(|i| composite_spectrum(&format!("epoch{}.dat", i), 4290.0, 4510.0, (0.0, 0.0)))
        .collect();
    let mut session = scenario(spectra);
    session.setup().unwrap();

    let mut groups: Vec<usize> = (0..4)
        .map(|i| session.observations().resolved_groups(i).unwrap()["rv"][0])
        .collect();
    groups.sort_unstable();
    assert_eq!(groups, vec![0, 1, 2, 3]);
    assert_eq!(session.registry().defined_groups(Some("secondary"), "rv"), vec![0, 1, 2, 3]);
}

#[test]
fn test_grid_spectra_are_shared_between_rv_groups() {
    let mut session = scenario(two_epochs(4510.0));
    session.setup().unwrap();
    // 2 regions x 2 components, independent of the number of epochs
    assert_eq!(session.synthesizer().calls, 4);
}

#[test]
fn test_spectrum_of_unknown_component() {
    let spectra = vec![composite_spectrum("epoch1.dat", 4290.0, 4510.0, (0.0, 0.0)).with_component("tertiary")];
    let mut session = scenario(spectra);
    assert!(matches!(session.setup(), Err(SpecFitError::Configuration(_))));
}

#[test]
fn test_all_groups_mode_follows_spectrum_groups() {
    let spectra = vec![
        composite_spectrum("hot.dat", 4290.0, 4510.0, (0.0, 0.0)).with_group("teff", &[0]),
        composite_spectrum("cool.dat", 4290.0, 4510.0, (0.0, 0.0)).with_group("teff", &[1]),
    ];
    let mut session = scenario(spectra).with_config(EngineConfig::new().with_mode(EnumerationMode::AllGroups));
    assert_eq!(session.setup().unwrap(), 4);

    assert_eq!(session.registry().defined_groups(Some("primary"), "teff"), vec![0, 1]);
    for comparison in session.engine().comparisons() {
        let index = comparison.observed.as_ref().unwrap().index;
        for model in &comparison.components {
            assert_eq!(model.groups["teff"], index);
        }
    }
}
