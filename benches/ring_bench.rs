//! Ring routing predicate and wire message codec benchmarking.

use std::time::Duration;

use chordlet::{between, owner_of, ChordletError, PeerMsg};

use rand::Rng;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

static LINES: [&str; 5] = [
    "REQUEST:Join 30 4",
    "REPLY:Join 5 10",
    "QUIT 10 20 30 1",
    "SVR: 10 1",
    "REQUEST:FILE: 2067 10 2",
];

fn route_all(triples: &[(u16, u16, u16)]) -> usize {
    triples
        .iter()
        .filter(|&&(lo, v, hi)| between(lo, v, hi))
        .count()
}

fn codec_all() -> Result<usize, ChordletError> {
    let mut total = 0;
    for line in LINES {
        let msg: PeerMsg = line.parse()?;
        total += msg.to_string().len();
    }
    Ok(total)
}

fn ring_bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_bench");
    group
        .sample_size(50)
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(3));

    let mut rng = rand::thread_rng();
    let triples: Vec<(u16, u16, u16)> = (0..4096)
        .map(|_| {
            (
                rng.gen_range(0..256),
                rng.gen_range(0..256),
                rng.gen_range(0..256),
            )
        })
        .collect();
    let keys: Vec<u64> = (0..4096).map(|_| rng.gen()).collect();

    group.bench_function("between", |b| {
        b.iter(|| route_all(black_box(&triples)))
    });
    group.bench_function("owner_of", |b| {
        b.iter(|| {
            keys.iter()
                .map(|&k| owner_of(black_box(k), 256) as u64)
                .sum::<u64>()
        })
    });
    group.bench_function("codec", |b| b.iter(codec_all));

    group.finish();
}

criterion_group!(benches, ring_bench_group);
criterion_main!(benches);
