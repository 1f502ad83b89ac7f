use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use cz_net::winograd::{convolve3, transform_filter, TILES, WINOGRAD_TILE};

fn random_buffer(rng: &mut ChaCha8Rng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn bench_convolve3(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for channels in [64usize, 128, 256] {
        let filters = random_buffer(&mut rng, channels * channels * 9);
        let input = random_buffer(&mut rng, channels * 64);
        let u = transform_filter(&filters, channels, channels);
        let mut v = vec![0.0f32; WINOGRAD_TILE * channels * TILES];
        let mut m = vec![0.0f32; WINOGRAD_TILE * channels * TILES];
        let mut y = vec![0.0f32; channels * 64];

        c.bench_function(&format!("winograd_convolve3_{}ch", channels), |b| {
            b.iter(|| {
                convolve3(
                    channels,
                    black_box(&input),
                    black_box(&u),
                    &mut v,
                    &mut m,
                    &mut y,
                );
                black_box(y[0])
            })
        });
    }
}

fn bench_filter_transform(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let channels = 128usize;
    let filters = random_buffer(&mut rng, channels * channels * 9);
    c.bench_function("winograd_filter_transform_128ch", |b| {
        b.iter(|| transform_filter(black_box(&filters), channels, channels).len())
    });
}

criterion_group!(benches, bench_convolve3, bench_filter_transform);
criterion_main!(benches);
