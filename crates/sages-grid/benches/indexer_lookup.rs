use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sages_grid::{build_indexer, Grid, Periodicity};

fn bench_lookup(c: &mut Criterion) {
    let grid = Grid::new(
        vec![-3.14, -3.14],
        vec![3.14, 3.14],
        vec![64, 64],
        Periodicity::All(true),
    )
    .unwrap();
    let indexer = build_indexer(&grid);
    let samples: Vec<[f64; 2]> = (0..1024)
        .map(|i| {
            let t = i as f64 * 0.0137;
            [7.0 * t.sin(), 5.0 * t.cos()]
        })
        .collect();

    c.bench_function("indexer_flat_lookup", |b| {
        b.iter(|| {
            for xi in &samples {
                black_box(indexer.flat_index(black_box(xi)).unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
