use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use filingscope::index::{IndexConfig, IvfPqIndex, ProductQuantizer};
use filingscope::vector::l2_squared;

fn generate_test_vectors(count: usize, dimension: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(count * dimension);
    for i in 0..count {
        for j in 0..dimension {
            let value = ((i as f32 * 0.1 + j as f32 * 0.01).sin() * 0.5 + 0.5) * 2.0 - 1.0;
            data.push(value);
        }
    }
    data
}

fn bench_product_quantizer(c: &mut Criterion) {
    let dimension = 384;
    let data = generate_test_vectors(2_000, dimension);
    let pq = ProductQuantizer::train(&data, dimension, 48, 8, 10, 42).unwrap();
    let query = &data[..dimension];
    let codes: Vec<Vec<u8>> = data
        .chunks_exact(dimension)
        .take(1_000)
        .map(|v| pq.encode(v).unwrap())
        .collect();

    let mut group = c.benchmark_group("product_quantizer");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(pq.encode(black_box(query)).unwrap()))
    });
    group.bench_function("adc_1000", |b| {
        let table = pq.distance_table(query).unwrap();
        b.iter(|| {
            for code in &codes {
                black_box(pq.adc(black_box(&table), black_box(code)));
            }
        })
    });
    group.bench_function("exact_l2_1000", |b| {
        b.iter(|| {
            for v in data.chunks_exact(dimension).take(1_000) {
                black_box(l2_squared(black_box(query), black_box(v)));
            }
        })
    });
    group.finish();
}

fn bench_ivf_pq_search(c: &mut Criterion) {
    let dimension = 128;
    let count = 20_000;
    let data = generate_test_vectors(count, dimension);
    let config = IndexConfig {
        dimension,
        n_lists: 64,
        pq_subvectors: 16,
        pq_bits: 8,
        training_threshold: 5_000,
        max_training_samples: 5_000,
        kmeans_iterations: 10,
        ..IndexConfig::default()
    };
    let mut index = IvfPqIndex::new(config).unwrap();
    for v in data.chunks_exact(dimension) {
        index.add(v).unwrap();
    }
    let query = &data[dimension * 17..dimension * 18];

    let mut group = c.benchmark_group("ivf_pq_search");
    for n_probe in [1, 8, 32] {
        group.bench_with_input(BenchmarkId::new("k10", n_probe), &n_probe, |b, &n_probe| {
            b.iter(|| black_box(index.search(black_box(query), 10, n_probe).unwrap()))
        });
    }
    group.bench_function("filtered_every_tenth", |b| {
        b.iter(|| {
            black_box(
                index
                    .search_filtered(black_box(query), 10, 8, |id| id % 10 == 0)
                    .unwrap(),
            )
        })
    });
    group.finish();
}

criterion_group!(benches, bench_product_quantizer, bench_ivf_pq_search);
criterion_main!(benches);
