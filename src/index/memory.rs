//! In-memory hash-table segment.
//!
//! Used for both halves of the incremental double buffer and as the
//! accumulator of the bulk build before each spill.

use crate::error::Result;
use crate::index::posting::{Posting, PostingList};
use crate::index::segment::Segment;
use crate::index::types::{AddReport, DataRange, DocId, Document, SegmentProperty};
use crate::utils::{Analyzer, StandardAnalyzer};
use ahash::AHashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

/// A document reduced to what postings need
pub(crate) struct AnalyzedDoc {
    pub id: DocId,
    pub doc_len: u32,
    pub quality: Option<f64>,
    /// Distinct terms with their in-document frequency, sorted by term
    pub term_freqs: Vec<(String, u32)>,
}

impl AnalyzedDoc {
    /// The posting this document contributes to `term`
    pub fn posting(&self, term_freq: u32) -> Posting {
        Posting::new(
            self.id,
            self.doc_len,
            term_freq,
            self.quality.unwrap_or(term_freq as f64),
        )
    }

    /// After an upsert, re-derive quality from the accumulated frequency
    pub fn settle(&self, entry: &mut Posting) {
        if self.quality.is_none() {
            entry.quality = entry.term_freq as f64;
        }
        entry.score = entry.quality;
    }
}

/// Analyze a batch in parallel. Documents with nothing indexable come back as `Err(id)`.
pub(crate) fn analyze_documents(
    analyzer: &dyn Analyzer,
    docs: &[Document],
) -> Vec<std::result::Result<AnalyzedDoc, DocId>> {
    docs.par_iter()
        .map(|doc| {
            let tokens = analyzer.analyze(&doc.indexed_text());
            let doc_len = u32::try_from(tokens.len()).map_err(|_| doc.id)?;
            if doc_len == 0 {
                return Err(doc.id);
            }

            let mut counts: AHashMap<String, u32> = AHashMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            let mut term_freqs: Vec<(String, u32)> = counts.into_iter().collect();
            term_freqs.sort_unstable_by(|a, b| a.0.cmp(&b.0));

            Ok(AnalyzedDoc {
                id: doc.id,
                doc_len,
                quality: doc.quality,
                term_freqs,
            })
        })
        .collect()
}

#[derive(Default)]
struct MemoryInner {
    postings: AHashMap<String, PostingList>,
    property: SegmentProperty,
}

/// Hash-table segment; lists are kept in storage order
pub struct MemorySegment {
    analyzer: Arc<dyn Analyzer>,
    inner: RwLock<MemoryInner>,
}

impl MemorySegment {
    /// Empty segment with the default analyzer
    pub fn new() -> Self {
        Self::with_analyzer(Arc::new(StandardAnalyzer))
    }

    pub fn with_analyzer(analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            analyzer,
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    pub fn with_data_range(self, range: DataRange) -> Self {
        self.inner.write().property.data_range = range;
        self
    }

    pub fn data_range(&self) -> DataRange {
        self.inner.read().property.data_range
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().postings.len()
    }

    /// Every (term, list) pair sorted by term, lists in storage order
    pub fn sorted_entries(&self) -> Vec<(String, PostingList)> {
        let inner = self.inner.read();
        let mut entries: Vec<(String, PostingList)> = inner
            .postings
            .iter()
            .map(|(term, list)| (term.clone(), list.clone()))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for MemorySegment {
    fn default() -> Self {
        Self::new()
    }
}

impl Segment for MemorySegment {
    fn add(&self, docs: &[Document]) -> Result<AddReport> {
        let analyzed = analyze_documents(self.analyzer.as_ref(), docs);

        let mut report = AddReport::default();
        let mut inner = self.inner.write();
        for doc in analyzed {
            let doc = match doc {
                Ok(doc) => doc,
                Err(id) => {
                    warn!(doc_id = id, "skipping document with no indexable terms");
                    report.skipped += 1;
                    continue;
                }
            };

            for (term, tf) in &doc.term_freqs {
                let list = inner.postings.entry(term.clone()).or_default();
                let entry = list.upsert(doc.posting(*tf));
                doc.settle(entry);
            }
            inner.property.doc_count += 1;
            inner.property.token_count += doc.doc_len as u64;
            report.indexed += 1;
        }

        debug!(indexed = report.indexed, skipped = report.skipped, "memory segment add");
        Ok(report)
    }

    fn get(&self, term: &str) -> Result<Option<PostingList>> {
        let inner = self.inner.read();
        Ok(inner.postings.get(term).map(|list| {
            let mut list = list.clone();
            list.reset_scores();
            list.sort_by_quality();
            list
        }))
    }

    fn property(&self) -> SegmentProperty {
        self.inner.read().property
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().postings.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.postings.clear();
        inner.property.doc_count = 0;
        inner.property.token_count = 0;
        Ok(())
    }
}
