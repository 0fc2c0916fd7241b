use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use maintenance_trainer::selection::{default_families, CandidateSearch, GridSearch};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_classification_data(n_rows: usize, n_features: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let x = Array2::from_shape_fn((n_rows, n_features), |_| rng.gen_range(-2.0..2.0));
    let y = x
        .rows()
        .into_iter()
        .map(|row| if row[0] + 0.5 * row[1] > 0.0 { 1.0 } else { 0.0 })
        .collect();
    (x, y)
}

fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    group.sample_size(10); // Fewer samples for training benchmarks

    let (x, y) = create_classification_data(300, 5);
    for family in default_families() {
        group.bench_with_input(BenchmarkId::new("family", &family.name), &family, |b, family| {
            b.iter(|| GridSearch::new(family).fit(black_box(&x), black_box(&y)).unwrap())
        });
    }

    group.finish();
}

fn bench_candidate_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_search");
    group.sample_size(10);

    let families = default_families();
    for n_rows in [100, 300].iter() {
        let (x, y) = create_classification_data(*n_rows, 5);
        for parallel in [false, true] {
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, n_rows), &(x.clone(), y.clone()), |b, (x, y)| {
                b.iter(|| {
                    CandidateSearch::new(&families)
                        .with_parallel(parallel)
                        .evaluate(black_box(x), black_box(y))
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_grid_search, bench_candidate_search);
criterion_main!(benches);
