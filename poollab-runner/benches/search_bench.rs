//! Criterion benchmarks for the portfolio search.
//!
//! Benchmarks:
//! 1. Subset enumeration for growing pools
//! 2. A full evaluation pass over synthetic prices
//! 3. Ranking a large candidate list

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use poollab_core::data::SyntheticPriceSource;
use poollab_core::domain::{ComboRange, TaskId};
use poollab_core::period::Period;
use poollab_core::position::parse;
use poollab_core::skills::{ComposerRegistry, Composition, ThresholdStrategy};
use poollab_core::PerformanceMetrics;
use poollab_runner::leaderboard::{rank, Candidate};
use poollab_runner::search::subsets;
use poollab_runner::{
    EscalationPolicy, MemorySink, PolicyOperator, SearchEngine, SearchSettings, SearchStats,
    Supervisor, SupervisorSettings,
};

// ── 1. Enumeration ───────────────────────────────────────────────────

fn bench_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("subsets");
    for n in [8usize, 12, 16] {
        let range = ComboRange::new(1, 4).unwrap();
        group.bench_with_input(BenchmarkId::new("1_to_4", n), &n, |b, &n| {
            b.iter(|| subsets(black_box(n), range).count())
        });
    }
    group.finish();
}

// ── 2. Evaluation pass ───────────────────────────────────────────────

fn bench_evaluation_pass(c: &mut Criterion) {
    let end = chrono::NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
    let evaluator = Arc::new(ThresholdStrategy::new(Arc::new(
        SyntheticPriceSource::with_end_date(end),
    )));
    let engine = SearchEngine::new(
        evaluator,
        ComposerRegistry::with_defaults(),
        SearchSettings {
            max_combinations: 20_000,
            concurrency: 4,
        },
    )
    .unwrap();
    let units: Vec<_> = ["多RB", "空I", "多CU", "空AG"]
        .iter()
        .map(|s| parse(s).unwrap())
        .collect();
    let periods = vec![Period::parse("3y").unwrap()];

    let mut group = c.benchmark_group("evaluate_all");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));
    group.bench_function("4_units_3y_budget_50", |b| {
        b.iter(|| {
            let sup = Supervisor::new(
                TaskId::from("task_bench"),
                SupervisorSettings::default(),
                Arc::new(PolicyOperator::new(EscalationPolicy::Halt)),
                Arc::new(MemorySink::new()),
            );
            let mut stats = SearchStats::default();
            engine.evaluate_all(&sup, &units, &periods, 50, &mut stats)
        })
    });
    group.finish();
}

// ── 3. Ranking ───────────────────────────────────────────────────────

fn bench_ranking(c: &mut Criterion) {
    let pool: Vec<Candidate> = (0..5_000)
        .map(|i| {
            let metrics = PerformanceMetrics {
                sharpe_ratio: ((i * 7919) % 1000) as f64 / 250.0 - 2.0,
                max_drawdown: -(((i * 104_729) % 500) as f64) / 1000.0,
                ..PerformanceMetrics::default()
            };
            Candidate {
                model: "mean_variance".into(),
                composition: Composition {
                    weights: vec![("多RB".into(), 0.5), ("空I".into(), -0.5)],
                    metrics,
                },
                order: i,
            }
        })
        .collect();

    c.bench_function("rank_5000_top_10", |b| {
        b.iter(|| rank(black_box(pool.clone()), 10))
    });
}

criterion_group!(benches, bench_enumeration, bench_evaluation_pass, bench_ranking);
criterion_main!(benches);
