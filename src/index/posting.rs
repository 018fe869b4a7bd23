//! Posting entries and the ordered list operations retrieval is built on.
//!
//! A list has two orderings that must not be confused:
//! - storage order: ascending `doc_id`, required by `intersect`, `union`,
//!   `difference` and by persistence
//! - quality order: descending `quality`, used to cut champion lists
//!
//! Set algebra assumes both operands are in storage order.

use crate::error::{IndexError, Result};
use crate::index::types::DocId;
use crate::utils::le_bytes;
use std::cmp::Ordering;

/// Encoded size of one posting
pub const POSTING_SIZE: usize = 4 + 4 + 4 + 8 + 8; // 28 bytes

/// One (term, document) row
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Posting {
    pub doc_id: DocId,
    /// Token count of the document at indexing time
    pub doc_len: u32,
    pub term_freq: u32,
    /// Static, term-independent quality signal
    pub quality: f64,
    /// Transient ranking score, recomputed per query
    pub score: f64,
}

impl Posting {
    pub fn new(doc_id: DocId, doc_len: u32, term_freq: u32, quality: f64) -> Self {
        Self {
            doc_id,
            doc_len,
            term_freq,
            quality,
            score: quality,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.doc_id.to_le_bytes());
        buf.extend_from_slice(&self.doc_len.to_le_bytes());
        buf.extend_from_slice(&self.term_freq.to_le_bytes());
        buf.extend_from_slice(&self.quality.to_le_bytes());
        buf.extend_from_slice(&self.score.to_le_bytes());
    }

    fn read_from(chunk: &[u8]) -> Self {
        Self {
            doc_id: u32::from_le_bytes(le_bytes(chunk, 0)),
            doc_len: u32::from_le_bytes(le_bytes(chunk, 4)),
            term_freq: u32::from_le_bytes(le_bytes(chunk, 8)),
            quality: f64::from_le_bytes(le_bytes(chunk, 12)),
            score: f64::from_le_bytes(le_bytes(chunk, 20)),
        }
    }
}

/// Descending by `key`, ties broken by ascending doc_id
#[inline]
fn descending_by(a: &Posting, b: &Posting, key: fn(&Posting) -> f64) -> Ordering {
    key(b).total_cmp(&key(a)).then(a.doc_id.cmp(&b.doc_id))
}

/// Ordered postings for a single term
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostingList {
    postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Posting> {
        self.postings.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Posting> {
        self.postings.iter_mut()
    }

    pub fn as_slice(&self) -> &[Posting] {
        &self.postings
    }

    pub fn into_vec(self) -> Vec<Posting> {
        self.postings
    }

    /// Append without any ordering guarantee
    pub fn push(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    /// Append every entry of `other`; call `normalize` before set algebra
    pub fn extend(&mut self, other: PostingList) {
        self.postings.extend(other.postings);
    }

    pub fn ids(&self) -> Vec<DocId> {
        self.postings.iter().map(|p| p.doc_id).collect()
    }

    /// Linear scan for a document
    pub fn find(&self, doc_id: DocId) -> Option<&Posting> {
        self.postings.iter().find(|p| p.doc_id == doc_id)
    }

    /// Insert keeping storage order, or add to the term frequency of the
    /// existing entry for the same document. Returns the stored entry.
    pub fn upsert(&mut self, posting: Posting) -> &mut Posting {
        match self
            .postings
            .binary_search_by_key(&posting.doc_id, |p| p.doc_id)
        {
            Ok(pos) => {
                let entry = &mut self.postings[pos];
                entry.term_freq = entry.term_freq.saturating_add(posting.term_freq);
                entry.doc_len = posting.doc_len;
                &mut self.postings[pos]
            }
            Err(pos) => {
                self.postings.insert(pos, posting);
                &mut self.postings[pos]
            }
        }
    }

    /// Keep entries of `self` whose document is also in `other`.
    /// The receiver's entries (and scores) are the ones kept.
    pub fn intersect(&mut self, other: &PostingList) {
        let theirs = &other.postings;
        let mut j = 0;
        self.postings.retain(|p| {
            while j < theirs.len() && theirs[j].doc_id < p.doc_id {
                j += 1;
            }
            j < theirs.len() && theirs[j].doc_id == p.doc_id
        });
    }

    /// Set union; on a shared document the receiver's entry wins.
    pub fn union(&mut self, other: &PostingList) {
        if other.is_empty() {
            return;
        }
        let ours = std::mem::take(&mut self.postings);
        let theirs = &other.postings;
        let mut merged = Vec::with_capacity(ours.len() + theirs.len());

        let (mut i, mut j) = (0, 0);
        while i < ours.len() && j < theirs.len() {
            match ours[i].doc_id.cmp(&theirs[j].doc_id) {
                Ordering::Less => {
                    merged.push(ours[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(theirs[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(ours[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&ours[i..]);
        merged.extend_from_slice(&theirs[j..]);
        self.postings = merged;
    }

    /// Remove documents present in `must_not`
    pub fn difference(&mut self, must_not: &PostingList) {
        let theirs = &must_not.postings;
        let mut j = 0;
        self.postings.retain(|p| {
            while j < theirs.len() && theirs[j].doc_id < p.doc_id {
                j += 1;
            }
            !(j < theirs.len() && theirs[j].doc_id == p.doc_id)
        });
    }

    pub fn sort_by_doc_id(&mut self) {
        self.postings.sort_by_key(|p| p.doc_id);
    }

    /// Storage order with one entry per document; the first of each run wins
    pub fn normalize(&mut self) {
        self.postings.sort_by_key(|p| p.doc_id);
        self.postings.dedup_by_key(|p| p.doc_id);
    }

    pub fn sort_by_quality(&mut self) {
        self.postings
            .sort_by(|a, b| descending_by(a, b, |p| p.quality));
    }

    pub fn sort_by_score(&mut self) {
        self.postings.sort_by(|a, b| descending_by(a, b, |p| p.score));
    }

    /// Top-`r` entries in quality order
    pub fn champions(mut self, r: usize) -> PostingList {
        self.sort_by_quality();
        self.postings.truncate(r);
        self
    }

    pub fn truncate(&mut self, len: usize) {
        self.postings.truncate(len);
    }

    pub fn retain<F: FnMut(&Posting) -> bool>(&mut self, f: F) {
        self.postings.retain(f);
    }

    /// Restore every transient score to the entry's static quality
    pub fn reset_scores(&mut self) {
        for p in &mut self.postings {
            p.score = p.quality;
        }
    }

    /// Fixed-width little-endian encoding, entries concatenated
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.postings.len() * POSTING_SIZE);
        for p in &self.postings {
            p.write_to(&mut buf);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<PostingList> {
        if bytes.len() % POSTING_SIZE != 0 {
            return Err(IndexError::corrupt(
                "postings",
                format!(
                    "length {} is not a multiple of {}",
                    bytes.len(),
                    POSTING_SIZE
                ),
            ));
        }
        let postings = bytes
            .chunks_exact(POSTING_SIZE)
            .map(Posting::read_from)
            .collect();
        Ok(PostingList { postings })
    }
}

impl From<Vec<Posting>> for PostingList {
    fn from(postings: Vec<Posting>) -> Self {
        Self { postings }
    }
}

impl FromIterator<Posting> for PostingList {
    fn from_iter<I: IntoIterator<Item = Posting>>(iter: I) -> Self {
        Self {
            postings: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PostingList {
    type Item = Posting;
    type IntoIter = std::vec::IntoIter<Posting>;

    fn into_iter(self) -> Self::IntoIter {
        self.postings.into_iter()
    }
}

impl<'a> IntoIterator for &'a PostingList {
    type Item = &'a Posting;
    type IntoIter = std::slice::Iter<'a, Posting>;

    fn into_iter(self) -> Self::IntoIter {
        self.postings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn list(ids: &[DocId]) -> PostingList {
        ids.iter().map(|&id| Posting::new(id, 10, 1, 1.0)).collect()
    }

    fn sorted_unique(ids: Vec<DocId>) -> Vec<DocId> {
        ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
    }

    #[test]
    fn test_intersect_keeps_left_entries() {
        let mut left: PostingList = vec![
            Posting::new(1, 5, 1, 9.0),
            Posting::new(3, 5, 1, 8.0),
            Posting::new(5, 5, 1, 7.0),
        ]
        .into();
        let right: PostingList = vec![Posting::new(3, 5, 1, 0.5), Posting::new(5, 5, 4, 0.1)].into();

        left.intersect(&right);
        assert_eq!(left.ids(), vec![3, 5]);
        assert_eq!(left.find(3).unwrap().quality, 8.0);
        assert_eq!(left.find(5).unwrap().term_freq, 1);
    }

    #[test]
    fn test_union_first_wins() {
        let mut left: PostingList = vec![Posting::new(2, 1, 1, 5.0)].into();
        let right: PostingList = vec![Posting::new(1, 1, 1, 1.0), Posting::new(2, 1, 1, 1.0)].into();

        left.union(&right);
        assert_eq!(left.ids(), vec![1, 2]);
        assert_eq!(left.find(2).unwrap().quality, 5.0);
    }

    #[test]
    fn test_difference() {
        let mut base = list(&[1, 2, 3, 4]);
        base.difference(&list(&[2, 4, 6]));
        assert_eq!(base.ids(), vec![1, 3]);
    }

    #[test]
    fn test_upsert_is_idempotent_per_document() {
        let mut postings = PostingList::new();
        postings.upsert(Posting::new(7, 3, 2, 2.0));
        postings.upsert(Posting::new(3, 4, 1, 1.0));
        let entry = postings.upsert(Posting::new(7, 3, 2, 2.0));
        assert_eq!(entry.term_freq, 4);

        assert_eq!(postings.ids(), vec![3, 7]);
        assert_eq!(postings.iter().filter(|p| p.doc_id == 7).count(), 1);
    }

    #[test]
    fn test_champions_use_quality_order() {
        let postings: PostingList = vec![
            Posting::new(1, 1, 1, 1.0),
            Posting::new(2, 1, 1, 3.0),
            Posting::new(3, 1, 1, 2.0),
            Posting::new(4, 1, 1, 3.0),
        ]
        .into();

        assert_eq!(postings.clone().champions(3).ids(), vec![2, 4, 3]);
        assert_eq!(postings.champions(100).len(), 4);
    }

    #[test]
    fn test_sort_by_score_tie_break() {
        let mut postings: PostingList = vec![
            Posting::new(9, 1, 1, 1.0),
            Posting::new(4, 1, 1, 1.0),
            Posting::new(6, 1, 1, 2.0),
        ]
        .into();
        postings.sort_by_score();
        assert_eq!(postings.ids(), vec![6, 4, 9]);
    }

    #[test]
    fn test_normalize_dedups_first_wins() {
        let mut postings: PostingList = vec![
            Posting::new(5, 1, 9, 1.0),
            Posting::new(2, 1, 1, 1.0),
            Posting::new(5, 1, 1, 1.0),
        ]
        .into();
        postings.normalize();
        assert_eq!(postings.ids(), vec![2, 5]);
        assert_eq!(postings.find(5).unwrap().term_freq, 9);
    }

    #[test]
    fn test_encode_layout() {
        let postings: PostingList = vec![Posting::new(1, 2, 3, 0.5)].into();
        let bytes = postings.encode();
        assert_eq!(bytes.len(), POSTING_SIZE);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..20], &0.5f64.to_le_bytes());
    }

    #[test]
    fn test_decode_empty_and_extremes() {
        assert!(PostingList::decode(&[]).unwrap().is_empty());

        let postings: PostingList = vec![Posting {
            doc_id: u32::MAX,
            doc_len: u32::MAX,
            term_freq: u32::MAX,
            quality: f64::MAX,
            score: -0.25,
        }]
        .into();
        assert_eq!(PostingList::decode(&postings.encode()).unwrap(), postings);
    }

    #[test]
    fn test_decode_rejects_partial_entry() {
        let err = PostingList::decode(&[0u8; POSTING_SIZE + 2]).unwrap_err();
        assert!(matches!(err, IndexError::CorruptData { .. }));
    }

    proptest! {
        #[test]
        fn prop_set_algebra_matches_sets(
            a in prop::collection::vec(0u32..500, 0..80),
            b in prop::collection::vec(0u32..500, 0..80),
        ) {
            let a = sorted_unique(a);
            let b = sorted_unique(b);
            let sa: BTreeSet<_> = a.iter().copied().collect();
            let sb: BTreeSet<_> = b.iter().copied().collect();

            let mut inter = list(&a);
            inter.intersect(&list(&b));
            prop_assert_eq!(inter.ids(), sa.intersection(&sb).copied().collect::<Vec<_>>());

            let mut uni = list(&a);
            uni.union(&list(&b));
            prop_assert_eq!(uni.ids(), sa.union(&sb).copied().collect::<Vec<_>>());

            let mut diff = list(&a);
            diff.difference(&list(&b));
            prop_assert_eq!(diff.ids(), sa.difference(&sb).copied().collect::<Vec<_>>());
        }

        #[test]
        fn prop_encode_decode(
            entries in prop::collection::vec(
                (any::<u32>(), any::<u32>(), any::<u32>(), -1e12f64..1e12, -1e12f64..1e12),
                0..50
            )
        ) {
            let postings: PostingList = entries
                .into_iter()
                .map(|(doc_id, doc_len, term_freq, quality, score)| Posting {
                    doc_id, doc_len, term_freq, quality, score,
                })
                .collect();
            prop_assert_eq!(PostingList::decode(&postings.encode()).unwrap(), postings);
        }
    }
}
