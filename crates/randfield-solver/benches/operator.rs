use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use randfield_core::comm::SelfComm;
use randfield_core::config::{GridConfig, RandomFieldOptions, StochasticConfig};
use randfield_core::grid::DomainDescriptor;
use randfield_field::StochasticField;
use randfield_solver::CovarianceOperator;

fn setup(cells: &[usize]) -> (CovarianceOperator, StochasticField) {
    let grid = GridConfig {
        extensions: vec![1.0; cells.len()],
        cells: cells.to_vec(),
    };
    let stochastic = StochasticConfig {
        variance: 1.0,
        covariance: "exponential".into(),
        anisotropy: "none".into(),
        corr_length: vec![0.1],
        anisotropy_rows: Vec::new(),
    };
    let options = RandomFieldOptions::default();
    let desc = DomainDescriptor::new(&grid, &options, Arc::new(SelfComm::new())).unwrap();
    let operator = CovarianceOperator::new(&desc, &stochastic, &options).unwrap();
    let field = StochasticField::new(&desc);
    (operator, field)
}

fn bench_generate(c: &mut Criterion) {
    let (mut operator, mut field) = setup(&[64, 64]);
    let mut seed = 0u64;
    c.bench_function("generate_64x64", |b| {
        b.iter(|| {
            seed += 1;
            operator.generate_field(seed, &mut field).unwrap();
        })
    });
}

fn bench_multiply(c: &mut Criterion) {
    let (mut operator, mut field) = setup(&[64, 64]);
    operator.generate_field(1, &mut field).unwrap();
    c.bench_function("multiply_64x64", |b| {
        b.iter(|| operator.multiply(&field).unwrap())
    });
}

criterion_group!(benches, bench_generate, bench_multiply);
criterion_main!(benches);
