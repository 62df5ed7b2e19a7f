//! Integration test: ensemble selection, persistence and held-out scoring

use prognos::data::{Dataset, TaskType};
use prognos::ensemble::{Candidate, EnsembleConfig, EnsembleModel, EnsembleSelector};
use prognos::evaluation::{evaluate_model, Evaluator};
use prognos::metrics::{Metric, Predictions};
use prognos::optimizer::Configuration;
use prognos::pipeline::{Pipeline, PipelineTemplate, Predict};
use prognos::plugins::PluginRegistry;
use prognos::PrognosError;
use polars::prelude::*;

fn create_classification_dataframe() -> DataFrame {
    let n = 60;
    let mut f1 = Vec::with_capacity(n);
    let mut f2 = Vec::with_capacity(n);
    let mut target = Vec::with_capacity(n);

    for i in 0..n {
        let label = (i % 2) as f64;
        f1.push(label * 2.0 + ((i * 7) % 11) as f64 / 10.0);
        f2.push((i as f64 * 0.3).sin() + label * 0.5);
        target.push(label);
    }

    df!(
        "feature1" => &f1,
        "feature2" => &f2,
        "target" => &target
    )
    .unwrap()
}

fn create_survival_dataset() -> Dataset {
    let n = 40;
    let mut risk = Vec::with_capacity(n);
    let mut time = Vec::with_capacity(n);
    let mut event = Vec::with_capacity(n);

    for i in 0..n {
        let r = ((i * 13) % 17) as f64 / 17.0;
        risk.push(r);
        time.push(1.0 + (1.0 - r) * 20.0 + (i % 3) as f64);
        event.push(if i % 5 == 4 { 0.0 } else { 1.0 });
    }

    let df = df!(
        "risk" => &risk,
        "time" => &time,
        "event" => &event
    )
    .unwrap();
    Dataset::from_dataframe(&df, "event", Some("time")).unwrap()
}

fn fitted(
    registry: &PluginRegistry,
    template: &PipelineTemplate,
    data: &Dataset,
    horizons: &[f64],
) -> Pipeline {
    let config = template.search_space(registry).unwrap().defaults();
    let mut pipeline = template.instantiate(registry, &config, horizons).unwrap();
    pipeline.fit(data.x(), data.target()).unwrap();
    pipeline
}

#[test]
fn test_save_load_predicts_identically() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let data = Dataset::from_dataframe(&create_classification_dataframe(), "target", None).unwrap();
    assert_eq!(data.feature_names(), &["feature1".to_string(), "feature2".to_string()]);

    let logistic = PipelineTemplate::new(vec!["standard_scaler".into()], "logistic_regression");
    let bayes = PipelineTemplate::new(vec![], "gaussian_naive_bayes");
    let model = EnsembleModel::new(
        vec![
            (fitted(&registry, &logistic, &data, &[]), 3.0),
            (fitted(&registry, &bayes, &data, &[]), 1.0),
        ],
        TaskType::Classification,
        Metric::Aucroc,
    )
    .unwrap();
    assert_eq!(model.weights(), vec![0.75, 0.25]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.p");
    model.save(&path).unwrap();
    let loaded = EnsembleModel::load(&path, &registry).unwrap();

    assert_eq!(loaded.weights(), model.weights());
    assert_eq!(loaded.task(), TaskType::Classification);
    assert_eq!(loaded.predict(data.x()).unwrap(), model.predict(data.x()).unwrap());

    match loaded.predict(data.x()).unwrap() {
        Predictions::Probabilities { classes, values } => {
            assert_eq!(classes, vec![0.0, 1.0]);
            for row in values.rows() {
                assert!((row.sum() - 1.0).abs() < 1e-9);
            }
        }
        other => panic!("expected probabilities, got {:?}", other),
    }

    let summary = evaluate_model(&loaded, &data, &Metric::suite(TaskType::Classification), None).unwrap();
    assert!(summary["aucroc"].mean > 0.8);
    assert_eq!(summary["aucroc"].std, 0.0);
    assert!(summary.contains_key("accuracy"));
}

#[test]
fn test_load_with_missing_plugin_fails() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let data = Dataset::from_dataframe(&create_classification_dataframe(), "target", None).unwrap();
    let template = PipelineTemplate::new(vec![], "gaussian_naive_bayes");
    let model = EnsembleModel::new(
        vec![(fitted(&registry, &template, &data, &[]), 1.0)],
        TaskType::Classification,
        Metric::Aucroc,
    )
    .unwrap();
    let bytes = model.to_bytes().unwrap();

    let empty = PluginRegistry::new();
    assert!(matches!(
        EnsembleModel::from_bytes(&bytes, &empty),
        Err(PrognosError::UnknownPlugin(_))
    ));
    assert!(EnsembleModel::from_bytes(&bytes[..bytes.len() / 2], &registry).is_err());
}

#[test]
fn test_unfitted_member_rejected() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let template = PipelineTemplate::new(vec![], "ridge_regression");
    let pipeline = template
        .instantiate(&registry, &Configuration::new(), &[])
        .unwrap();
    let result = EnsembleModel::new(vec![(pipeline, 1.0)], TaskType::Regression, Metric::R2);
    assert!(result.is_err());
}

#[test]
fn test_selector_weights_are_normalized() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let data = Dataset::from_dataframe(&create_classification_dataframe(), "target", None).unwrap();
    let evaluator = Evaluator::new(&registry, TaskType::Classification).with_random_state(3);

    let candidates: Vec<Candidate> = [
        PipelineTemplate::new(vec!["standard_scaler".into()], "logistic_regression"),
        PipelineTemplate::new(vec![], "gaussian_naive_bayes"),
    ]
    .into_iter()
    .map(|template| {
        let configuration = template.search_space(&registry).unwrap().defaults();
        let score = evaluator
            .evaluate(&template, &configuration, &data)
            .unwrap()
            .summary["aucroc"]
            .mean;
        Candidate {
            template,
            configuration,
            score,
        }
    })
    .collect();

    let config = EnsembleConfig::default().with_max_size(4).with_max_repeats(2);
    let model = EnsembleSelector::new(&evaluator, Metric::Aucroc, config)
        .select(&candidates, &data)
        .unwrap();

    let weights = model.weights();
    assert!(!weights.is_empty() && weights.len() <= 2);
    assert!(weights.iter().all(|w| *w > 0.0));
    assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    assert!(model.members().iter().all(|m| m.pipeline.is_fitted()));
}

#[test]
fn test_survival_ensemble_scored_against_training_censoring() {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let data = create_survival_dataset();
    data.validate(TaskType::RiskEstimation).unwrap();
    let horizons = [6.0, 12.0];

    let cox = PipelineTemplate::new(vec![], "cox_ph");
    let scaled = PipelineTemplate::new(vec!["minmax_scaler".into()], "cox_ph");
    let model = EnsembleModel::new(
        vec![
            (fitted(&registry, &cox, &data, &horizons), 1.0),
            (fitted(&registry, &scaled, &data, &horizons), 1.0),
        ],
        TaskType::RiskEstimation,
        Metric::CIndex,
    )
    .unwrap();

    match model.predict(data.x()).unwrap() {
        Predictions::Risks { horizons: h, values } => {
            assert_eq!(h, horizons.to_vec());
            assert_eq!(values.dim(), (40, 2));
            assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        other => panic!("expected risks, got {:?}", other),
    }

    let summary = evaluate_model(
        &model,
        &data,
        &Metric::suite(TaskType::RiskEstimation),
        Some(&data),
    )
    .unwrap();
    assert!(summary["c_index"].mean > 0.5);
    assert!(summary.contains_key("brier_score"));
}
