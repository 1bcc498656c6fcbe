#[cfg(test)]
mod tests {
    use crate::error::SpecFitError;
    use crate::parameters::{Bounds, Parameter, ParameterRegistry, ParameterUpdate};
    use ndarray::array;
    use std::collections::BTreeMap;
    use std::f64::{INFINITY, NEG_INFINITY};

    fn two_components() -> ParameterRegistry {
        let mut registry = ParameterRegistry::new();
        let values = BTreeMap::from([
            ("teff".to_string(), 20000.0),
            ("logg".to_string(), 4.5),
        ]);
        registry.add_component("primary", &values).unwrap();
        registry.add_component("secondary", &values).unwrap();
        registry
    }

    #[test]
    fn test_bounds_creation() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(bounds.min, 0.0);
        assert_eq!(bounds.max, 10.0);
        assert_eq!(bounds.width(), 10.0);

        assert!(Bounds::new(10.0, 0.0).is_err());
        assert!(Bounds::new(f64::NAN, 0.0).is_err());

        let bounds = Bounds::unbounded();
        assert_eq!(bounds.min, NEG_INFINITY);
        assert_eq!(bounds.max, INFINITY);
        assert!(!bounds.is_finite());
    }

    #[test]
    fn test_bounds_serialization() {
        let json = serde_json::to_string(&Bounds::unbounded()).unwrap();
        assert_eq!(json, r#"{"min":null,"max":null}"#);

        let bounds: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(bounds, Bounds::unbounded());

        let bounds: Bounds = serde_json::from_str(r#"{"min":-1000.0,"max":1000.0}"#).unwrap();
        assert_eq!(bounds.as_pair(), (-1000.0, 1000.0));

        assert!(serde_json::from_str::<Bounds>(r#"{"min":2.0,"max":1.0}"#).is_err());
    }

    #[test]
    fn test_parameter_creation() {
        let param = Parameter::new("primary", "TEFF", 15000.0, 6000.0, 50000.0, 2).unwrap();
        assert_eq!(param.name(), "teff");
        assert_eq!(param.component(), "primary");
        assert_eq!(param.group(), 2);
        assert_eq!(param.vmin(), 6000.0);
        assert_eq!(param.vmax(), 50000.0);
        assert!(!param.fitted());

        assert!(Parameter::new("primary", "teff", 1000.0, 6000.0, 50000.0, 0).is_err());
    }

    #[test]
    fn test_parameter_set_value() {
        let mut param = Parameter::new("primary", "lr", 0.5, 0.0, 1.0, 0).unwrap();
        param.set_value(0.7).unwrap();
        assert_eq!(param.value(), 0.7);

        assert!(param.set_value(1.5).is_err());
        assert_eq!(param.value(), 0.7);

        assert!(param.set_bounds(0.8, 1.0).is_err());
        param.set_bounds(0.5, 1.0).unwrap();
        assert_eq!(param.vmin(), 0.5);
    }

    #[test]
    fn test_parameter_apply_update() {
        let mut param = Parameter::new("primary", "rv", 0.0, -100.0, 100.0, 0).unwrap();
        let update = ParameterUpdate {
            value: Some(150.0),
            vmax: Some(200.0),
            ..ParameterUpdate::default()
        };
        param.apply(&update).unwrap();
        assert_eq!(param.value(), 150.0);
        assert_eq!(param.vmax(), 200.0);

        // A rejected update leaves the parameter untouched
        let update = ParameterUpdate::value(500.0);
        assert!(param.apply(&update).is_err());
        assert_eq!(param.value(), 150.0);
    }

    #[test]
    fn test_add_component_defaults() {
        let registry = two_components();
        assert_eq!(registry.components(), vec!["primary", "secondary"]);
        assert_eq!(
            registry.parameter_names(),
            vec!["logg", "lr", "rv", "teff", "vrot", "z"]
        );
        assert_eq!(registry.len(), 12);
        assert_eq!(registry.get("secondary", "teff", 0).unwrap().value(), 20000.0);
        assert_eq!(registry.get("secondary", "lr", 0).unwrap().value(), 1.0);

        let mut registry = registry;
        assert!(registry.add_component("primary", &BTreeMap::new()).is_err());

        let bad = BTreeMap::from([("mass".to_string(), 1.0)]);
        assert!(matches!(
            registry.add_component("tertiary", &bad),
            Err(SpecFitError::Configuration(_))
        ));
    }

    #[test]
    fn test_register_duplicate_and_bounds() {
        let mut registry = ParameterRegistry::new();
        registry
            .register("primary", "teff", 20000.0, 6000.0, 50000.0, 0, true)
            .unwrap();

        let err = registry
            .register("primary", "teff", 21000.0, 6000.0, 50000.0, 0, false)
            .unwrap_err();
        assert!(matches!(err, SpecFitError::Configuration(_)));

        let err = registry
            .register("primary", "logg", 7.0, 0.0, 5.0, 0, false)
            .unwrap_err();
        assert!(matches!(err, SpecFitError::BoundsViolation(_)));

        let err = registry
            .register("all", "logg", 4.0, 0.0, 5.0, 0, false)
            .unwrap_err();
        assert!(matches!(err, SpecFitError::Configuration(_)));
    }

    #[test]
    fn test_clone_and_remove_keeps_unique_triples() {
        let mut registry = two_components();
        let generation = registry.topology_generation();

        registry
            .clone_parameter("primary", "rv", 0, 1, &ParameterUpdate::value(25.0))
            .unwrap();
        assert!(registry.topology_generation() > generation);
        assert_eq!(registry.get("primary", "rv", 1).unwrap().value(), 25.0);
        assert_eq!(registry.get("primary", "rv", 0).unwrap().value(), 0.0);

        // Cloned instances are independent
        registry.set_value("primary", "rv", 0, -10.0).unwrap();
        assert_eq!(registry.get("primary", "rv", 1).unwrap().value(), 25.0);

        // Removing the default group leaves exactly one instance
        registry.remove("primary", "rv", 0).unwrap();
        assert_eq!(registry.defined_groups(Some("primary"), "rv"), vec![1]);

        let err = registry.remove("primary", "rv", 1).unwrap_err();
        assert!(matches!(err, SpecFitError::Configuration(_)));

        let err = registry.remove("primary", "rv", 7).unwrap_err();
        assert!(matches!(err, SpecFitError::NotFound(_)));

        let err = registry
            .clone_parameter("primary", "rv", 1, 1, &ParameterUpdate::default())
            .unwrap_err();
        assert!(matches!(err, SpecFitError::Configuration(_)));
    }

    #[test]
    fn test_undefined_group_is_not_found() {
        let mut registry = two_components();
        assert!(matches!(
            registry.set_value("primary", "teff", 3, 20000.0),
            Err(SpecFitError::NotFound(_))
        ));
        assert!(matches!(
            registry.get("tertiary", "teff", 0),
            Err(SpecFitError::NotFound(_))
        ));
    }

    #[test]
    fn test_fitted_order_is_stable() {
        let mut registry = two_components();
        registry.set_groups("all", "rv", &[0, 1]).unwrap();
        registry
            .update(None, "rv", None, &ParameterUpdate::fitted(true))
            .unwrap();
        registry
            .update(Some("secondary"), "teff", None, &ParameterUpdate::fitted(true))
            .unwrap();
        registry.set_fitted("primary", "logg", 0, true).unwrap();

        let keys: Vec<String> = registry
            .fitted_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "primary:logg[0]",
                "primary:rv[0]",
                "primary:rv[1]",
                "secondary:rv[0]",
                "secondary:rv[1]",
                "secondary:teff[0]",
            ]
        );

        registry
            .scatter(&array![4.0, 10.0, 20.0, -10.0, -20.0, 18000.0])
            .unwrap();
        assert_eq!(registry.get("primary", "rv", 1).unwrap().value(), 20.0);
        assert_eq!(registry.get("secondary", "teff", 0).unwrap().value(), 18000.0);
        assert_eq!(
            registry.fitted_values(),
            array![4.0, 10.0, 20.0, -10.0, -20.0, 18000.0]
        );

        assert!(matches!(
            registry.scatter(&array![1.0]),
            Err(SpecFitError::DataMismatch(_))
        ));
    }

    #[test]
    fn test_parameters_for_groups() {
        let mut registry = two_components();
        registry.set_groups("primary", "rv", &[1, 2]).unwrap();
        registry.set_value("primary", "rv", 2, 42.0).unwrap();

        let groups = BTreeMap::from([("rv".to_string(), 2)]);
        let values = registry.parameters_for_groups("primary", &groups).unwrap();
        assert_eq!(values["rv"], 42.0);
        assert_eq!(values["teff"], 20000.0);

        let groups = BTreeMap::from([("rv".to_string(), 5)]);
        assert!(registry.parameters_for_groups("primary", &groups).is_err());

        // Resolution falls back to the lowest defined group
        let resolved = registry.resolve_groups("primary", &groups).unwrap();
        assert_eq!(resolved["rv"], 0);
        assert_eq!(resolved["teff"], 0);
        let groups = BTreeMap::from([("rv".to_string(), 2)]);
        assert_eq!(registry.resolve_groups("primary", &groups).unwrap()["rv"], 2);
    }

    #[test]
    fn test_components_needing_synthesis() {
        let mut registry = two_components();
        registry
            .update(None, "rv", None, &ParameterUpdate::fitted(true))
            .unwrap();
        registry
            .update(None, "lr", None, &ParameterUpdate::fitted(true))
            .unwrap();
        assert!(registry.components_needing_synthesis().is_empty());

        registry.set_fitted("secondary", "teff", 0, true).unwrap();
        let needing = registry.components_needing_synthesis();
        assert_eq!(needing.len(), 1);
        assert!(needing.contains("secondary"));
    }

    #[test]
    fn test_clear_and_restore_fitted() {
        let mut registry = two_components();
        registry.set_fitted("primary", "teff", 0, true).unwrap();
        registry.set_fitted("secondary", "rv", 0, true).unwrap();

        let previous = registry.clear_fitted();
        assert_eq!(previous.len(), 2);
        assert_eq!(registry.fitted_count(), 0);

        registry.restore_fitted(&previous).unwrap();
        assert_eq!(registry.fitted_keys(), previous);
    }

    #[test]
    fn test_from_parameters_round_trip() {
        let registry = two_components();
        let rebuilt = ParameterRegistry::from_parameters(registry.iter().cloned()).unwrap();
        assert_eq!(
            registry.iter().collect::<Vec<_>>(),
            rebuilt.iter().collect::<Vec<_>>()
        );
    }
}
