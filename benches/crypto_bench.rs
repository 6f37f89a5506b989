// benches/crypto_bench.rs
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use keyfort::core::crypto::cipher::random_bytes;
use keyfort::core::crypto::{codes, ecies, kdf, keys, Ecies, HashBasedCounter};

fn bench_ecies_roundtrip(c: &mut Criterion) {
    let server = keys::generate_key_pair();
    let shared_info2 = ecies::shared_info2_application("bench-secret");
    let payload = random_bytes(256);

    c.bench_function("ecies_encrypt_request", |b| {
        b.iter(|| {
            ecies::encrypt_request(
                &server.public_key,
                ecies::INFO1_APPLICATION,
                shared_info2.clone(),
                black_box(&payload),
                Some(random_bytes(16)),
            )
            .unwrap()
        })
    });

    let (cryptogram, _) = ecies::encrypt_request(
        &server.public_key,
        ecies::INFO1_APPLICATION,
        shared_info2.clone(),
        &payload,
        Some(random_bytes(16)),
    )
    .unwrap();
    let ephemeral =
        keys::import_public_key(cryptogram.ephemeral_public_key.as_deref().unwrap()).unwrap();

    c.bench_function("ecies_decrypt_request", |b| {
        b.iter(|| {
            let session = Ecies::for_request(
                &server.private_key,
                &ephemeral,
                ecies::INFO1_APPLICATION,
                shared_info2.clone(),
            );
            session.decrypt_request(black_box(&cryptogram)).unwrap()
        })
    });
}

fn bench_kdf(c: &mut Criterion) {
    let secret = random_bytes(32);
    c.bench_function("kdf_x963_48", |b| {
        b.iter(|| kdf::kdf_x963(black_box(&secret), b"/pa/generic/application", 48))
    });
}

fn bench_counter_lookahead(c: &mut Criterion) {
    let seed = HashBasedCounter::init();
    c.bench_function("counter_lookahead_20", |b| {
        b.iter(|| HashBasedCounter::lookahead(black_box(&seed), 20))
    });
}

fn bench_activation_codes(c: &mut Criterion) {
    c.bench_function("activation_code_generate", |b| b.iter(codes::generate_code));

    let code = codes::generate_code();
    c.bench_function("activation_code_validate", |b| {
        b.iter(|| codes::validate_code(black_box(&code)))
    });
}

criterion_group!(
    crypto_benches,
    bench_ecies_roundtrip,
    bench_kdf,
    bench_counter_lookahead,
    bench_activation_codes
);
criterion_main!(crypto_benches);
