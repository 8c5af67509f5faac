use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use cvxbiclust::config::{BiclusterConfig, PenaltySequence};
use cvxbiclust::path::bicluster_path;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A seeded block matrix: `blocks x blocks` cells of constant level plus noise.
fn block_matrix(n_rows: usize, n_cols: usize, blocks: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((n_rows, n_cols), |(i, j)| {
        let level = ((i * blocks / n_rows) * blocks + (j * blocks / n_cols)) as f64 * 3.0;
        level + rng.gen_range(-0.1..0.1)
    })
}

fn benchmark_path(c: &mut Criterion) {
    let sizes = [(12usize, 10usize), (24, 20), (48, 40)];
    let penalties = PenaltySequence::log_spaced(0.05, 50.0, 8).unwrap();
    let config = BiclusterConfig {
        phi: 0.5,
        k_row: 4,
        k_col: 4,
        max_iterations: 2000,
        ..Default::default()
    };

    let mut group = c.benchmark_group("fusion_path");
    group.sample_size(10);
    for &(n_rows, n_cols) in sizes.iter() {
        let x = block_matrix(n_rows, n_cols, 2, 0xB1C);
        group.throughput(Throughput::Elements((n_rows * n_cols) as u64));
        group.bench_with_input(
            BenchmarkId::new("bicluster_path", format!("{n_rows}x{n_cols}")),
            &x,
            |b, input| {
                b.iter(|| {
                    let result =
                        bicluster_path(black_box(input.view()), &penalties, &config).unwrap();
                    black_box(result);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(fusion_path, benchmark_path);
criterion_main!(fusion_path);
