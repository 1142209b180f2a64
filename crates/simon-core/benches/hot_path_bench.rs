//! Criterion benchmarks for the per-keystroke hot path.
//!
//! Every keystroke seen by the hook performs a registry lookup, and every
//! transaction decodes one device response.
//!
//! Run with:
//! ```bash
//! cargo bench --package simon-core --bench hot_path_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use simon_core::{decode_verdict, encode_pattern, Challenge, KeyCode, KeyRegistry};

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = KeyRegistry::new();
    for vk in 0x41..=0x5Au16 {
        registry
            .register(KeyCode(vk), Challenge::Length(u32::from(vk - 0x40)))
            .expect("valid binding");
    }

    c.bench_function("registry_lookup_hit", |b| {
        b.iter(|| registry.lookup(black_box(KeyCode(0x4D))))
    });
    c.bench_function("registry_lookup_miss", |b| {
        b.iter(|| registry.lookup(black_box(KeyCode(0x20))))
    });
}

fn bench_codec(c: &mut Criterion) {
    c.bench_function("decode_verdict_success", |b| {
        b.iter(|| decode_verdict(black_box("SUCCESS\r\n")))
    });
    c.bench_function("decode_verdict_noise", |b| {
        b.iter(|| decode_verdict(black_box("button 3 pressed, waiting\r\n")))
    });
    c.bench_function("encode_pattern_8", |b| {
        b.iter(|| encode_pattern(black_box(&[1, 2, 3, 4, 4, 3, 2, 1])))
    });
}

criterion_group!(benches, bench_registry_lookup, bench_codec);
criterion_main!(benches);
