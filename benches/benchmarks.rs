//! Performance benchmarks for tiersearch
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use crossbeam::channel;
use std::path::PathBuf;
use tempfile::TempDir;
use tiersearch::index::{
    Document, IndexConfig, MemorySegment, Posting, PostingList, SearchModel, Searcher, Segment,
    StreamMessage, build_index,
};
use tiersearch::query::Query;
use tiersearch::utils::{Analyzer, StandardAnalyzer};

const WORDS: &[&str] = &[
    "donut", "glass", "plate", "coffee", "teapot", "kettle", "sugar", "flour", "oven", "recipe",
    "morning", "market", "bakery", "crumb", "icing", "sprinkle",
];

fn sample_docs(n: u32) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let text: Vec<&str> = (0..12)
                .map(|j| WORDS[((i * 7 + j * 3) as usize) % WORDS.len()])
                .collect();
            Document::new(i, text.join(" "))
        })
        .collect()
}

/// Build a full index in a temp directory for benchmarking
fn create_benchmark_index(n: u32) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let base = temp_dir.path().join("full");

    let mut config = IndexConfig::default();
    config.build.spill_threshold = 1_000;
    let (tx, rx) = channel::unbounded();
    for doc in sample_docs(n) {
        tx.send(StreamMessage::Document(doc)).expect("Failed to queue document");
    }
    tx.send(StreamMessage::End).expect("Failed to end stream");
    build_index(rx, &base, &config).expect("Failed to build index");

    (temp_dir, base)
}

fn sparse_list(len: u32, step: u32) -> PostingList {
    (0..len).map(|i| Posting::new(i * step, 10, 1, 1.0)).collect()
}

fn bench_posting_algebra(c: &mut Criterion) {
    let mut group = c.benchmark_group("posting_algebra");
    for size in [1_000u32, 10_000, 100_000] {
        let a = sparse_list(size, 2);
        let b = sparse_list(size, 3);
        group.bench_with_input(BenchmarkId::new("intersect", size), &size, |bench, _| {
            bench.iter(|| {
                let mut left = a.clone();
                left.intersect(black_box(&b));
                left
            })
        });
        group.bench_with_input(BenchmarkId::new("union", size), &size, |bench, _| {
            bench.iter(|| {
                let mut left = a.clone();
                left.union(black_box(&b));
                left
            })
        });
    }
    group.finish();
}

fn bench_posting_codec(c: &mut Criterion) {
    let list = sparse_list(10_000, 1);
    let bytes = list.encode();

    c.bench_function("posting_encode_10k", |b| b.iter(|| black_box(&list).encode()));
    c.bench_function("posting_decode_10k", |b| {
        b.iter(|| PostingList::decode(black_box(&bytes)))
    });
}

fn bench_analysis(c: &mut Criterion) {
    let text = "A donut on a glass plate. Only the donuts. ".repeat(50);
    c.bench_function("standard_analyzer_2kb", |b| {
        b.iter(|| StandardAnalyzer.analyze(black_box(&text)))
    });

    let docs = sample_docs(1_000);
    c.bench_function("memory_segment_add_1k", |b| {
        b.iter(|| {
            let segment = MemorySegment::new();
            segment.add(black_box(&docs))
        })
    });
}

fn bench_retrieval(c: &mut Criterion) {
    let (_temp_dir, base) = create_benchmark_index(5_000);
    let searcher = Searcher::open(&base, IndexConfig::default()).expect("Failed to open index");

    let mut group = c.benchmark_group("retrieval");
    for model in [SearchModel::Boolean, SearchModel::VectorSpace, SearchModel::Bm25] {
        group.bench_function(format!("{:?}", model), |b| {
            let query = Query::must(["donut", "glass"]).with_should(["icing"]);
            b.iter(|| searcher.retrieval(black_box(&query), model))
        });
    }
    group.bench_function("search_text", |b| {
        b.iter(|| searcher.search(black_box("coffee and a donut")))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_posting_algebra,
    bench_posting_codec,
    bench_analysis,
    bench_retrieval,
);
criterion_main!(benches);
