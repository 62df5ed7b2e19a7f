use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use prognos::data::{Dataset, TaskType};
use prognos::evaluation::Evaluator;
use prognos::optimizer::{
    HyperparameterSpace, OptimizerLoop, ProposerKind, SearchBudget, SearchConfig, StopHandle,
};
use prognos::metrics::{Metric, MetricStats, MetricSummary};
use prognos::pipeline::PipelineTemplate;
use prognos::plugins::PluginRegistry;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;

fn create_classification_data(n_rows: usize, n_features: usize) -> Dataset {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen::<f64>() * 10.0);
    let y = Array1::from_shape_fn(n_rows, |i| {
        let s: f64 = x.row(i).iter().take(3).sum();
        if s + rng.gen::<f64>() > 15.5 {
            1.0
        } else {
            0.0
        }
    });
    Dataset::new(x, y)
}

fn bench_cross_validation(c: &mut Criterion) {
    let registry = PluginRegistry::with_builtin_plugins().unwrap();
    let template = PipelineTemplate::new(vec!["standard_scaler".into()], "logistic_regression");
    let config = template.search_space(&registry).unwrap().defaults();

    let mut group = c.benchmark_group("cross_validation");
    group.sample_size(10);

    for n_rows in [500, 2000].iter() {
        let data = create_classification_data(*n_rows, 10);
        for parallel in [false, true] {
            let evaluator = Evaluator::new(&registry, TaskType::Classification)
                .with_n_folds(5)
                .with_parallel_folds(parallel);
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, n_rows), &data, |b, data| {
                b.iter(|| evaluator.evaluate(&template, &config, black_box(data)).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_proposers(c: &mut Criterion) {
    let space = HyperparameterSpace::new()
        .float("x", -2.0, 2.0)
        .log_float("alpha", 1e-3, 1e2)
        .integer("depth", 1, 10);
    let objective = |config: &prognos::optimizer::Configuration| -> prognos::Result<MetricSummary> {
        let x = config["x"].as_float().unwrap_or(0.0);
        let mut summary = MetricSummary::new();
        summary.insert(
            "r2".to_string(),
            MetricStats {
                mean: 1.0 - (x - 0.5).powi(2),
                std: 0.0,
            },
        );
        Ok(summary)
    };

    let mut group = c.benchmark_group("search");
    for kind in [ProposerKind::Random, ProposerKind::GaussianProcess] {
        let search = OptimizerLoop::new(
            SearchConfig::new(Metric::R2)
                .with_budget(SearchBudget::trials(30))
                .with_proposer(kind)
                .with_seed(7),
        );
        group.bench_function(format!("{:?}", kind), |b| {
            b.iter(|| search.search(&space, objective, Vec::new(), None, &StopHandle::new()).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cross_validation, bench_proposers);
criterion_main!(benches);
