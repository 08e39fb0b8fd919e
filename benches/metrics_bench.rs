//! Benchmarks for the metrics hot path: tokenization, lemmatization, and
//! frequency statistics over transcripts of varying lengths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use parlametric::model::TokenizerMode;
use parlametric::{MetricsConfig, TextMetricsEngine};

const SENTENCE: &str =
    "je vais au marché tous les matins et j'achète des fruits frais pour ma famille";

/// Build a transcript of roughly `n` words by repeating the base sentence.
fn transcript(n: usize) -> String {
    let words_per_sentence = SENTENCE.split_whitespace().count();
    let repeats = n.div_ceil(words_per_sentence);
    vec![SENTENCE; repeats].join(" ")
}

fn engine(mode: TokenizerMode) -> TextMetricsEngine {
    TextMetricsEngine::new(MetricsConfig {
        mode,
        ..MetricsConfig::default()
    })
    .expect("embedded lexicons load")
}

fn bench_compute_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_metrics");
    for size in [50usize, 500, 5000] {
        let text = transcript(size);
        let linguistic = engine(TokenizerMode::Linguistic);
        group.bench_with_input(
            BenchmarkId::new("linguistic", size),
            &text,
            |b, text| b.iter(|| linguistic.compute_metrics(text, 2.0).unwrap()),
        );
        let simple = engine(TokenizerMode::Simple);
        group.bench_with_input(BenchmarkId::new("simple", size), &text, |b, text| {
            b.iter(|| simple.compute_metrics(text, 2.0).unwrap())
        });
    }
    group.finish();
}

fn bench_engine_construction(c: &mut Criterion) {
    // Lexicons are process-wide statics; construction after warmup should be
    // table lookups only.
    let _ = engine(TokenizerMode::Linguistic);
    c.bench_function("engine_construction_warm", |b| {
        b.iter(|| engine(TokenizerMode::Linguistic))
    });
}

criterion_group!(benches, bench_compute_metrics, bench_engine_construction);
criterion_main!(benches);
