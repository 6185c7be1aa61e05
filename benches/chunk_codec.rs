use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dpf_client::codec::{
    ArrayKind, Payload, aligned_chunk_size, chunk_count, chunks, decode_strings, encode_strings,
};

const CHUNK_BYTES: usize = 256 * 1024;

fn random_doubles(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.r#gen::<f64>() * 1e3).collect()
}

fn random_names(n: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let len = rng.gen_range(0..24);
            format!("body_{i}_{}", "x".repeat(len))
        })
        .collect()
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking");
    for &n in &[1_000usize, 100_000, 1_000_000] {
        let bytes = Payload::Double(random_doubles(n, 7)).to_le_bytes();
        let chunk = aligned_chunk_size(ArrayKind::Double, CHUNK_BYTES);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("split", n), &bytes, |b, bytes| {
            b.iter(|| {
                let mut total = 0usize;
                for (info, part) in chunks(bytes, chunk) {
                    total += part.len() + info.index as usize;
                }
                black_box(total);
            });
        });
        group.bench_with_input(BenchmarkId::new("count", n), &bytes.len(), |b, &len| {
            b.iter(|| black_box(chunk_count(black_box(len), chunk)));
        });
    }
    group.finish();
}

fn bench_payloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_le_bytes");
    for &n in &[1_000usize, 100_000, 1_000_000] {
        let payload = Payload::Double(random_doubles(n, 11));
        let bytes = payload.to_le_bytes();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", n), &payload, |b, p| {
            b.iter(|| black_box(p.to_le_bytes()));
        });
        group.bench_with_input(BenchmarkId::new("decode", n), &bytes, |b, bytes| {
            b.iter(|| {
                let out = Payload::from_le_bytes(ArrayKind::Double, bytes, None);
                black_box(out.ok());
            });
        });
    }
    group.finish();
}

fn bench_strings(c: &mut Criterion) {
    let mut group = c.benchmark_group("strings");
    for &n in &[100usize, 10_000] {
        let names = random_names(n, 3);
        let bytes = encode_strings(&names);
        group.bench_with_input(BenchmarkId::new("encode", n), &names, |b, names| {
            b.iter(|| black_box(encode_strings(names)));
        });
        group.bench_with_input(BenchmarkId::new("decode", n), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_strings(bytes, Some(n)).ok()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunking, bench_payloads, bench_strings);
criterion_main!(benches);
