//! Benchmarks for sealstore-crypto

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sealstore_crypto::{
    cipher::{initialized_cipher, wrap_key, CipherMode},
    keys::{KeyAlgorithm, MasterKey, PrivateKey, SymmetricKey},
};

fn bench_content_ciphers(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_ciphers");
    let keys = [
        ("aes-128-cbc", SymmetricKey::generate(KeyAlgorithm::Aes, 128).unwrap()),
        ("aes-256-cbc", SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap()),
        ("chacha20", SymmetricKey::generate(KeyAlgorithm::ChaCha20, 256).unwrap()),
    ];

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let data = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        for (name, key) in keys.iter() {
            group.bench_with_input(
                BenchmarkId::new(format!("{}-encrypt", name), size),
                &data,
                |b, data| {
                    b.iter(|| {
                        initialized_cipher(key, CipherMode::Encrypt)
                            .unwrap()
                            .do_final(data)
                            .unwrap()
                    })
                },
            );

            let ciphertext = initialized_cipher(key, CipherMode::Encrypt)
                .unwrap()
                .do_final(&data)
                .unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{}-decrypt", name), size),
                &ciphertext,
                |b, ciphertext| {
                    b.iter(|| {
                        initialized_cipher(key, CipherMode::Decrypt)
                            .unwrap()
                            .do_final(ciphertext)
                            .unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_key_wrapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_wrapping");
    let content_key = SymmetricKey::generate(KeyAlgorithm::Aes, 128).unwrap();

    let symmetric = MasterKey::Symmetric(SymmetricKey::generate(KeyAlgorithm::Aes, 256).unwrap());
    group.bench_function("aes-256-master", |b| {
        b.iter(|| wrap_key(&symmetric, &content_key).unwrap())
    });

    let asymmetric = MasterKey::Public(PrivateKey::generate().public_key());
    group.bench_function("x25519-master", |b| {
        b.iter(|| wrap_key(&asymmetric, &content_key).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_content_ciphers, bench_key_wrapping);
criterion_main!(benches);
