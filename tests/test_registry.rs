//! Integration test: registry listing, spaces and template enumeration

use ndarray::{Array1, Array2};
use prognos::data::{Target, TaskType};
use prognos::optimizer::{Configuration, ParameterValue};
use prognos::pipeline::PipelineTemplate;
use prognos::plugins::{PluginCategory, PluginRegistry, PluginSubtype};
use prognos::PrognosError;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

#[test]
fn test_listing_by_subtype() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();

    assert_eq!(
        registry.list_available(Some(PluginCategory::Preprocessing), Some(PluginSubtype::FeatureScaling)),
        vec!["minmax_scaler".to_string(), "standard_scaler".to_string()]
    );
    assert_eq!(
        registry.list_available(None, Some(PluginSubtype::RiskEstimation)),
        vec!["cox_ph".to_string()]
    );
    assert_eq!(
        registry.list_available(None, Some(PluginSubtype::Regressor)),
        vec!["knn_regression".to_string(), "ridge_regression".to_string()]
    );
    let everything = registry.list_available(None, None);
    assert_eq!(everything.len(), registry.len());
}

#[test]
fn test_template_space_is_stage_prefixed() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let template = PipelineTemplate::new(vec!["variance_threshold".into()], "logistic_regression");
    assert_eq!(template.id(), "variance_threshold+logistic_regression");

    let space = template.search_space(&registry).unwrap();
    assert!(!space.is_empty());
    for dim in space.dimensions() {
        assert!(
            dim.name.starts_with("variance_threshold.") || dim.name.starts_with("logistic_regression."),
            "unprefixed dimension {}",
            dim.name
        );
    }

    // sampled configurations always validate and instantiate
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    for _ in 0..20 {
        let config = space.sample(&mut rng);
        space.validate(&config).unwrap();
        template.instantiate(&registry, &config, &[]).unwrap();
    }
}

#[test]
fn test_enumeration_covers_empty_preprocessing() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let templates = PipelineTemplate::enumerate(
        &registry,
        &["standard_scaler".to_string(), "variance_threshold".to_string()],
        &["ridge_regression".to_string()],
    )
    .unwrap();

    let ids: Vec<String> = templates.iter().map(|t| t.id()).collect();
    assert_eq!(
        ids,
        vec![
            "ridge_regression",
            "variance_threshold+ridge_regression",
            "standard_scaler+ridge_regression",
            "standard_scaler+variance_threshold+ridge_regression",
        ]
    );
    for template in &templates {
        template.validate(&registry, TaskType::Regression).unwrap();
        assert!(matches!(
            template.validate(&registry, TaskType::Classification),
            Err(PrognosError::CapabilityAbsent { .. })
        ));
    }
}

#[test]
fn test_predictor_as_preprocessing_rejected() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let result = PipelineTemplate::enumerate(
        &registry,
        &["ridge_regression".to_string()],
        &["ridge_regression".to_string()],
    );
    assert!(matches!(result, Err(PrognosError::ConfigError(_))));
}

#[test]
fn test_out_of_range_configuration_fails_fast() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let template = PipelineTemplate::new(vec![], "ridge_regression");

    let mut config = Configuration::new();
    config.insert("ridge_regression.alpha".to_string(), ParameterValue::Float(1e6));
    assert!(matches!(
        template.instantiate(&registry, &config, &[]),
        Err(PrognosError::InvalidHyperparameter { .. })
    ));

    let mut config = Configuration::new();
    config.insert("alpha".to_string(), ParameterValue::Float(1.0));
    assert!(matches!(
        template.instantiate(&registry, &config, &[]),
        Err(PrognosError::InvalidHyperparameter { .. })
    ));
}

#[test]
fn test_every_builtin_restores_bit_identically() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let n = 24;
    let x = Array2::from_shape_fn((n, 3), |(i, j)| {
        ((i * (j + 3)) % 7) as f64 + 0.25 * j as f64 + (i % 2) as f64 * 1.5
    });
    let labels = Array1::from_shape_fn(n, |i| (i % 2) as f64);
    let values = Array1::from_shape_fn(n, |i| x[[i, 0]] * 2.0 - x[[i, 2]] + 0.1 * i as f64);
    let time = Array1::from_shape_fn(n, |i| 1.0 + ((i * 5) % 13) as f64);
    let event = Array1::from_shape_fn(n, |i| if i % 4 == 3 { 0.0 } else { 1.0 });
    let horizons = [4.0, 9.0];

    let names = registry.list_available(None, None);
    assert_eq!(names.len(), registry.len());
    for name in names {
        let subtype = registry.descriptor(&name).unwrap().subtype;
        let target = match subtype {
            PluginSubtype::Regressor => Target::new(&values, None),
            PluginSubtype::RiskEstimation => Target::new(&event, Some(&time)),
            _ => Target::new(&labels, None),
        };

        let mut plugin = registry.instantiate(&name, &Configuration::new()).unwrap();
        plugin.fit(&x, target).unwrap();
        let bytes = plugin.to_bytes().unwrap();
        let restored = registry.load(&name, &bytes).unwrap();
        assert_eq!(restored.name(), plugin.name());
        assert_eq!(restored.to_bytes().unwrap(), bytes, "{} re-encodes differently", name);

        if subtype.category() == PluginCategory::Preprocessing {
            assert_eq!(
                plugin.transform(&x).unwrap(),
                restored.transform(&x).unwrap(),
                "{} transforms differently after restore",
                name
            );
        } else {
            assert_eq!(
                plugin.predict(&x, &horizons).unwrap(),
                restored.predict(&x, &horizons).unwrap(),
                "{} predicts differently after restore",
                name
            );
        }
    }
}
