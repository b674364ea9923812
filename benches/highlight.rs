//! Benchmarks for editor syntax highlighting.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use snipbox::highlight::highlight_source;
use snipbox::session::SAMPLE_SNIPPET;

fn bench_highlight_sample(c: &mut Criterion) {
    c.bench_function("highlight_sample", |b| {
        b.iter(|| highlight_source(black_box(SAMPLE_SNIPPET)))
    });
}

fn bench_highlight_long(c: &mut Criterion) {
    let source = SAMPLE_SNIPPET.repeat(50);
    c.bench_function("highlight_long", |b| {
        b.iter(|| highlight_source(black_box(&source)))
    });
}

criterion_group!(benches, bench_highlight_sample, bench_highlight_long);
criterion_main!(benches);
