//! Bulk build and offline merge.

use crossbeam::channel;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tiersearch::index::build::{build_from_jsonl, spill_path};
use tiersearch::index::{
    DiskSegment, Document, IndexConfig, SearchModel, Searcher, Segment, StreamMessage, build_index,
    merge_index,
};
use tiersearch::query::Query;
use tiersearch::utils::{Analyzer, StandardAnalyzer};

fn corpus(n: u32) -> Vec<Document> {
    (0..n)
        .map(|i| Document::new(i, format!("donut batch{} topic{}", i % 5, i % 3)))
        .collect()
}

fn build(docs: &[Document], dest: &Path, spill_threshold: usize) -> tiersearch::index::BuildReport {
    let mut config = IndexConfig::default();
    config.build.spill_threshold = spill_threshold;
    let (tx, rx) = channel::unbounded();
    for doc in docs {
        tx.send(StreamMessage::Document(doc.clone())).unwrap();
    }
    tx.send(StreamMessage::End).unwrap();
    build_index(rx, dest, &config).unwrap()
}

#[test]
fn test_build_merges_every_spill() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("full");
    let docs = corpus(23);

    let report = build(&docs, &dest, 5);
    assert_eq!(report.documents, 23);
    assert_eq!(report.spill_files, 5);
    // spill files are removed after the merge
    assert!(!spill_path(&dest, 0).exists());

    let segment = DiskSegment::open(&dest, &IndexConfig::default().store).unwrap();
    assert_eq!(segment.property().doc_count, 23);

    let expected: BTreeSet<String> = docs
        .iter()
        .flat_map(|d| StandardAnalyzer.analyze(&d.text))
        .collect();
    let keys: BTreeSet<String> = segment.keys().into_iter().collect();
    assert_eq!(keys, expected);
    assert_eq!(report.terms, expected.len());

    let donut = segment.get("donut").unwrap().unwrap();
    assert_eq!(donut.len(), 23);
    let batch0 = segment.get("batch0").unwrap().unwrap();
    let mut ids = batch0.ids();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 5, 10, 15, 20]);
}

#[test]
fn test_build_replaces_stale_spills_and_old_index() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("full");
    build(&corpus(10), &dest, 4);
    fs::write(spill_path(&dest, 7), b"stale").unwrap();

    let report = build(&[Document::new(100, "glass plate")], &dest, 4);
    assert_eq!(report.spill_files, 1);
    assert!(!spill_path(&dest, 7).exists());

    let segment = DiskSegment::open(&dest, &IndexConfig::default().store).unwrap();
    assert_eq!(segment.property().doc_count, 1);
    assert!(segment.get("donut").unwrap().is_none());
}

#[test]
fn test_built_index_serves_searcher() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("full");
    build(
        &[
            Document::new(1, "A donut on a glass plate. Only the donuts."),
            Document::new(2, "donut is a donut"),
            Document::new(3, "glass teapot"),
        ],
        &dest,
        2,
    );

    let searcher = Searcher::open(&dest, IndexConfig::default()).unwrap();
    let hits = searcher
        .retrieval(&Query::must(["donut"]), SearchModel::Bm25)
        .unwrap();
    assert_eq!(hits.ids(), vec![2, 1]);
    let hits = searcher
        .retrieval(&Query::must(["glass"]).with_not(["donut"]), SearchModel::Boolean)
        .unwrap();
    assert_eq!(hits.ids(), vec![3]);
    searcher.close().unwrap();
}

#[test]
fn test_build_from_jsonl_skips_malformed_lines() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("docs.jsonl");
    let lines = [
        serde_json::to_string(&Document::new(1, "donut")).unwrap(),
        "{not json".to_string(),
        String::new(),
        serde_json::to_string(&Document::new(2, "glass plate")).unwrap(),
    ];
    fs::write(&input, lines.join("\n")).unwrap();

    let dest = dir.path().join("full");
    let report = build_from_jsonl(&input, &dest, &IndexConfig::default(), true).unwrap();
    assert_eq!(report.documents, 2);
    assert_eq!(report.spill_files, 1);
}

#[test]
fn test_merge_index_sums_counts() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    build(&[Document::new(1, "donut"), Document::new(2, "glass")], &src, 10);
    build(&[Document::new(3, "donut plate")], &dst, 10);

    let terms = merge_index(&src, &dst, &IndexConfig::default()).unwrap();
    assert_eq!(terms, 2);

    let merged = DiskSegment::open(&dst, &IndexConfig::default().store).unwrap();
    assert_eq!(merged.property().doc_count, 3);
    assert_eq!(merged.property().token_count, 4);
    let mut donut = merged.get("donut").unwrap().unwrap().ids();
    donut.sort_unstable();
    assert_eq!(donut, vec![1, 3]);
    assert_eq!(merged.get("glass").unwrap().unwrap().ids(), vec![2]);
}
