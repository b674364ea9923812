//! Benchmarks for snippet parsing and execution.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use snipbox::sandbox::net::OfflineFetcher;
use snipbox::sandbox::{DEFAULT_RELAY_URL, RunEnv, inline};
use snipbox::script::{ParseMode, parse};
use snipbox::session::SAMPLE_SNIPPET;

const LOOP_SNIPPET: &str = r"
let total = 0;
for (let i = 0; i < 2000; i++) {
  total += i % 7;
}
const words = ['alpha', 'beta', 'gamma'].map((w) => w.toUpperCase());
console.log(total, words.join(','));
";

fn bench_parse_sample(c: &mut Criterion) {
    c.bench_function("parse_sample", |b| {
        b.iter(|| parse(black_box(SAMPLE_SNIPPET), ParseMode::FunctionBody).unwrap())
    });
}

fn bench_inline_loop(c: &mut Criterion) {
    let env = RunEnv::new(DEFAULT_RELAY_URL, Arc::new(OfflineFetcher));
    c.bench_function("inline_loop", |b| {
        b.iter(|| inline::run(black_box(LOOP_SNIPPET), &env))
    });
}

criterion_group!(benches, bench_parse_sample, bench_inline_loop);
criterion_main!(benches);
