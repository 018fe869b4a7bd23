//! Scoring module for retrieval results
//!
//! Implements the two re-ranking models applied after set algebra:
//! - BM25 with per-posting document length normalization
//! - cosine similarity between idf-weighted term frequency vectors
//!
//! All term statistics live in a [`TermTable`] owned by a single query, so
//! concurrent queries and separate indices never share scoring state.

use crate::index::posting::{Posting, PostingList};
use crate::index::types::{Bm25Params, DocId, TermId};
use rustc_hash::FxHashMap;

/// Inverse document frequency: `log2(N / df + 1)`
#[inline]
pub fn idf(doc_count: u64, doc_freq: u64) -> f64 {
    if doc_freq == 0 {
        return 0.0;
    }
    (doc_count as f64 / doc_freq as f64 + 1.0).log2()
}

/// BM25 contribution of one term to one document
#[inline]
pub fn bm25_term(idf: f64, term_freq: u32, doc_len: u32, avg_doc_len: f64, params: &Bm25Params) -> f64 {
    let tf = term_freq as f64;
    let len_ratio = if avg_doc_len > 0.0 {
        doc_len as f64 / avg_doc_len
    } else {
        1.0
    };
    let norm = params.k1 * (1.0 - params.b + params.b * len_ratio);
    idf * tf * (params.k1 + 1.0) / (tf + norm)
}

/// Statistics recorded for one query term
#[derive(Debug, Clone, PartialEq)]
pub struct TermStats {
    pub term: String,
    /// Full posting-list length at lookup time
    pub doc_freq: u64,
    pub term_id: TermId,
}

/// Per-query term bookkeeping
#[derive(Debug, Default)]
pub struct TermTable {
    term_ids: FxHashMap<String, TermId>,
    idf: FxHashMap<TermId, f64>,
    /// Sparse token-id vector of every candidate document
    doc_tf: FxHashMap<DocId, FxHashMap<TermId, u32>>,
    /// Token-id vector of the synthetic query document
    query_tf: FxHashMap<TermId, u32>,
}

impl TermTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable id of `term`, assigned on first sight
    pub fn term_id(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.term_ids.get(term) {
            return id;
        }
        let id = self.term_ids.len() as TermId;
        self.term_ids.insert(term.to_string(), id);
        id
    }

    /// Count `term` once more in the query document
    pub fn record_query_term(&mut self, term: &str) {
        let id = self.term_id(term);
        *self.query_tf.entry(id).or_insert(0) += 1;
    }

    /// Record idf for `term` and the term frequency of every champion
    pub fn record(&mut self, term: &str, doc_count: u64, doc_freq: u64, champions: &PostingList) -> TermStats {
        let term_id = self.term_id(term);
        self.idf.insert(term_id, idf(doc_count, doc_freq));
        for posting in champions {
            self.doc_tf
                .entry(posting.doc_id)
                .or_default()
                .insert(term_id, posting.term_freq);
        }
        TermStats {
            term: term.to_string(),
            doc_freq,
            term_id,
        }
    }

    pub fn idf_of(&self, term: &str) -> Option<f64> {
        self.term_ids.get(term).and_then(|id| self.idf.get(id)).copied()
    }

    /// BM25 summed over every recorded term the document matched
    pub fn bm25(&self, posting: &Posting, avg_doc_len: f64, params: &Bm25Params) -> f64 {
        let Some(terms) = self.doc_tf.get(&posting.doc_id) else {
            return 0.0;
        };
        terms
            .iter()
            .map(|(id, &tf)| {
                let idf = self.idf.get(id).copied().unwrap_or(0.0);
                bm25_term(idf, tf, posting.doc_len, avg_doc_len, params)
            })
            .sum()
    }

    /// Cosine similarity between the query vector and the document vector
    pub fn cosine(&self, doc_id: DocId) -> f64 {
        let Some(terms) = self.doc_tf.get(&doc_id) else {
            return 0.0;
        };

        let query_norm: f64 = self
            .query_tf
            .iter()
            .map(|(id, &tf)| {
                let w = tf as f64 * self.idf.get(id).copied().unwrap_or(0.0);
                w * w
            })
            .sum();

        let mut dot = 0.0;
        let mut doc_norm = 0.0;
        for (id, &tf) in terms {
            let idf = self.idf.get(id).copied().unwrap_or(0.0);
            let doc_weight = tf as f64 * idf;
            let query_weight = self.query_tf.get(id).copied().unwrap_or(0) as f64 * idf;
            dot += doc_weight * query_weight;
            doc_norm += doc_weight * doc_weight;
        }

        let denom = (query_norm * doc_norm).sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}
