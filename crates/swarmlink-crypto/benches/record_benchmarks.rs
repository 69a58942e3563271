use criterion::{black_box, criterion_group, criterion_main, Criterion};
use swarmlink_crypto::record::{encode_for_signing, sign, verify};
use swarmlink_crypto::*;

fn sample_value() -> Value {
    let mut stuff = Stuff::new();
    stuff.insert("title", "benchmark").unwrap();
    stuff.insert("kind", "site").unwrap();
    stuff.to_value(&[0x5a; 20])
}

fn benchmark_identity_derivation(c: &mut Criterion) {
    init().unwrap();

    c.bench_function("derive identity", |b| {
        b.iter(|| Identity::from_seed(black_box(&[3u8; 32])).unwrap());
    });
}

fn benchmark_encoding(c: &mut Criterion) {
    let value = sample_value();

    c.bench_function("encode signing payload", |b| {
        b.iter(|| encode_for_signing(black_box(12), black_box(&value), None).unwrap());
    });
}

fn benchmark_signing(c: &mut Criterion) {
    init().unwrap();
    let identity = Identity::generate();
    let payload = encode_for_signing(12, &sample_value(), None).unwrap();

    c.bench_function("sign record", |b| {
        b.iter(|| {
            sign(
                black_box(&payload),
                black_box(&identity.address()),
                black_box(&identity.secret_key),
            )
            .unwrap()
        });
    });
}

fn benchmark_verification(c: &mut Criterion) {
    init().unwrap();
    let identity = Identity::generate();
    let payload = encode_for_signing(12, &sample_value(), None).unwrap();
    let signature = sign(&payload, &identity.address(), &identity.secret_key).unwrap();

    c.bench_function("verify record", |b| {
        b.iter(|| {
            verify(
                black_box(&signature),
                black_box(&payload),
                black_box(&identity.address()),
            )
        });
    });
}

criterion_group!(
    benches,
    benchmark_identity_derivation,
    benchmark_encoding,
    benchmark_signing,
    benchmark_verification
);
criterion_main!(benches);
