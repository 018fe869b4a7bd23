//! Disk-backed segment over an ordered key-value store.
//!
//! Files for a segment at `base`:
//! - `{base}.idx` / `{base}.kv`: the store (term -> encoded posting list)
//! - `{base}.sum`: the summary (document/token counts and data range)

use crate::error::{IndexError, Result};
use crate::index::memory::{AnalyzedDoc, analyze_documents};
use crate::index::posting::{POSTING_SIZE, PostingList};
use crate::index::segment::Segment;
use crate::index::store::{FileStore, KvStore, remove_if_exists, suffixed};
use crate::index::summary;
use crate::index::types::{AddReport, DataRange, Document, SegmentProperty, StoreConfig};
use crate::utils::{Analyzer, StandardAnalyzer, TermFilter};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct DiskSegment {
    base: PathBuf,
    analyzer: Arc<dyn Analyzer>,
    store: RwLock<Box<dyn KvStore>>,
    property: RwLock<SegmentProperty>,
    /// Every key ever written; rejects most absent terms without a lookup
    filter: RwLock<TermFilter>,
    /// Set once the segment has been replaced; files go when the last handle drops
    retired: AtomicBool,
}

impl DiskSegment {
    /// Open the segment at `base` with the default analyzer
    pub fn open(base: &Path, config: &StoreConfig) -> Result<Self> {
        Self::open_with(base, config, Arc::new(StandardAnalyzer))
    }

    /// Open the segment at `base`. A missing summary means an empty
    /// segment; a summary that exists but cannot be decoded is an error.
    pub fn open_with(base: &Path, config: &StoreConfig, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        let property = summary::read(&suffixed(base, ".sum"))?.unwrap_or_default();
        let store = FileStore::open(base, config)?;
        Ok(Self::from_store(base, Box::new(store), property, analyzer))
    }

    /// Create a fresh segment at `base`, discarding whatever files were there
    pub fn create(base: &Path, config: &StoreConfig, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        for suffix in [".idx", ".kv", ".sum"] {
            remove_if_exists(&suffixed(base, suffix))?;
        }
        Self::open_with(base, config, analyzer)
    }

    /// Build over any store implementation
    pub fn from_store(
        base: &Path,
        store: Box<dyn KvStore>,
        property: SegmentProperty,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        let keys = store.keys();
        let filter = TermFilter::from_terms(keys.iter().map(String::as_str), keys.len().max(1024));
        Self {
            base: base.to_path_buf(),
            analyzer,
            store: RwLock::new(store),
            property: RwLock::new(property),
            filter: RwLock::new(filter),
            retired: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn data_range(&self) -> DataRange {
        self.property.read().data_range
    }

    pub fn set_data_range(&self, range: DataRange) {
        self.property.write().data_range = range;
    }

    pub fn set_property(&self, property: SegmentProperty) {
        *self.property.write() = property;
    }

    /// Add another segment's counts to this one
    pub fn absorb_property(&self, other: &SegmentProperty) {
        let mut property = self.property.write();
        *property = property.merged(other);
    }

    /// Postings in storage order as stored, including staged writes
    pub fn stored(&self, term: &str) -> Result<Option<PostingList>> {
        if !self.filter.read().might_contain(term) {
            return Ok(None);
        }
        let values = self.store.read().lookup_dirty(term)?;
        match values.into_iter().next() {
            Some(bytes) => Ok(Some(PostingList::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage a whole posting list for `term`; the list must be in storage order
    pub fn insert_list(&self, term: &str, postings: &PostingList) -> Result<()> {
        self.store.write().insert(term, postings.encode())?;
        self.filter.write().insert(term);
        Ok(())
    }

    /// Every (term, list) pair in term order, lists in storage order
    pub fn entries(&self) -> Result<Vec<(String, PostingList)>> {
        let store = self.store.read();
        store
            .full_key_set()
            .map(|pair| {
                let (key, bytes) = pair?;
                Ok((key, PostingList::decode(&bytes)?))
            })
            .collect()
    }

    /// Lists staged since the last flush
    pub fn staged_len(&self) -> usize {
        self.store.read().dirty_len()
    }

    /// Persist staged lists and the summary
    pub fn flush(&self) -> Result<()> {
        self.store.write().drain()?;
        summary::write(&suffixed(&self.base, ".sum"), &self.property.read())?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.store.write().close()?;
        summary::write(&suffixed(&self.base, ".sum"), &self.property.read())?;
        debug!(base = %self.base.display(), "closed disk segment");
        Ok(())
    }

    /// Every updated list for one document, built on top of `staged`
    fn stage_document(
        &self,
        doc: &AnalyzedDoc,
        staged: &AHashMap<String, PostingList>,
    ) -> Result<Vec<(String, PostingList)>> {
        let mut lists = Vec::with_capacity(doc.term_freqs.len());
        for (term, tf) in &doc.term_freqs {
            let mut list = match staged.get(term) {
                Some(list) => list.clone(),
                None => self.stored(term)?.unwrap_or_default(),
            };
            let entry = list.upsert(doc.posting(*tf));
            doc.settle(entry);
            if u32::try_from(list.len() * POSTING_SIZE).is_err() {
                return Err(IndexError::Config(format!("posting list for '{}' is too large", term)));
            }
            lists.push((term.clone(), list));
        }
        Ok(lists)
    }

    /// Mark the segment superseded; its files are removed on final drop
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Segment for DiskSegment {
    fn add(&self, docs: &[Document]) -> Result<AddReport> {
        let analyzed = analyze_documents(self.analyzer.as_ref(), docs);

        let mut report = AddReport::default();
        let mut added = SegmentProperty::default();
        // lists touched by this batch; a document lands here only if all its terms staged
        let mut staged: AHashMap<String, PostingList> = AHashMap::new();
        for doc in analyzed {
            let doc = match doc {
                Ok(doc) => doc,
                Err(id) => {
                    warn!(doc_id = id, "skipping document with no indexable terms");
                    report.skipped += 1;
                    continue;
                }
            };

            match self.stage_document(&doc, &staged) {
                Ok(lists) => {
                    staged.extend(lists);
                    added.doc_count += 1;
                    added.token_count += doc.doc_len as u64;
                    report.indexed += 1;
                }
                Err(e) => {
                    warn!(doc_id = doc.id, error = %e, "skipping document that could not be staged");
                    report.skipped += 1;
                }
            }
        }

        for (term, list) in &staged {
            self.insert_list(term, list)?;
        }
        self.absorb_property(&added);
        self.flush()?;
        Ok(report)
    }

    fn get(&self, term: &str) -> Result<Option<PostingList>> {
        Ok(self.stored(term)?.map(|mut list| {
            list.reset_scores();
            list.sort_by_quality();
            list
        }))
    }

    fn property(&self) -> SegmentProperty {
        *self.property.read()
    }

    fn keys(&self) -> Vec<String> {
        self.store.read().keys()
    }

    fn clear(&self) -> Result<()> {
        self.store.write().destroy()?;
        remove_if_exists(&suffixed(&self.base, ".sum"))?;
        *self.filter.write() = TermFilter::default();

        let mut property = self.property.write();
        property.doc_count = 0;
        property.token_count = 0;
        Ok(())
    }
}

impl Drop for DiskSegment {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        match self.clear() {
            Ok(()) => info!(base = %self.base.display(), "removed retired segment"),
            Err(e) => warn!(base = %self.base.display(), error = %e, "failed to remove retired segment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::posting::Posting;
    use std::fs;
    use tempfile::TempDir;

    fn open(base: &Path) -> DiskSegment {
        DiskSegment::open(base, &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_missing_files_give_empty_segment() {
        let dir = TempDir::new().unwrap();
        let segment = open(&dir.path().join("full"));
        assert_eq!(segment.property(), SegmentProperty::default());
        assert!(segment.keys().is_empty());
        assert!(segment.get("donut").unwrap().is_none());
    }

    #[test]
    fn test_add_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("full");
        {
            let segment = open(&base);
            segment
                .add(&[
                    Document::new(1, "A donut on a glass plate. Only the donuts."),
                    Document::new(2, "donut is a donut"),
                ])
                .unwrap();
            segment.close().unwrap();
        }

        let segment = open(&base);
        assert_eq!(segment.property().doc_count, 2);
        assert_eq!(segment.property().token_count, 9);
        assert_eq!(segment.get("donut").unwrap().unwrap().ids(), vec![2, 1]);
        assert_eq!(segment.get("glass").unwrap().unwrap().ids(), vec![1]);
    }

    #[test]
    fn test_corrupt_summary_fails_open() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("full");
        fs::write(suffixed(&base, ".sum"), b"bad").unwrap();

        let err = DiskSegment::open(&base, &StoreConfig::default()).err().unwrap();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn test_insert_list_and_entries() {
        let dir = TempDir::new().unwrap();
        let segment = open(&dir.path().join("aux"));
        let list: PostingList = vec![Posting::new(1, 3, 1, 1.0), Posting::new(4, 3, 2, 2.0)].into();
        segment.insert_list("plate", &list).unwrap();
        segment.insert_list("glass", &list).unwrap();

        // staged writes are visible before flush
        assert_eq!(segment.stored("plate").unwrap().unwrap(), list);
        segment.flush().unwrap();

        let entries = segment.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "glass");
        assert_eq!(entries[1].1.ids(), vec![1, 4]);
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("full");
        let segment = open(&base);
        segment.add(&[Document::new(1, "donut")]).unwrap();
        assert!(suffixed(&base, ".sum").exists());

        segment.clear().unwrap();
        assert!(!suffixed(&base, ".sum").exists());
        assert!(!suffixed(&base, ".idx").exists());
        assert_eq!(segment.property().doc_count, 0);
        assert!(segment.get("donut").unwrap().is_none());
    }

    #[test]
    fn test_retired_segment_removed_on_last_drop() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("aux");
        let segment = Arc::new(open(&base));
        segment.add(&[Document::new(1, "donut")]).unwrap();

        let reader = Arc::clone(&segment);
        segment.retire();
        drop(segment);
        // a reader still holding the handle sees the data
        assert_eq!(reader.get("donut").unwrap().unwrap().ids(), vec![1]);
        assert!(suffixed(&base, ".idx").exists());

        drop(reader);
        assert!(!suffixed(&base, ".idx").exists());
        assert!(!suffixed(&base, ".sum").exists());
    }

    #[test]
    fn test_unreadable_list_skips_only_that_document() {
        let dir = TempDir::new().unwrap();
        let segment = open(&dir.path().join("full"));
        segment.store.write().insert("broken", vec![1, 2, 3]).unwrap();
        segment.filter.write().insert("broken");

        let report = segment
            .add(&[
                Document::new(1, "donut broken"),
                Document::new(2, "donut plate"),
                Document::new(3, "donut"),
            ])
            .unwrap();
        assert_eq!(report, AddReport { indexed: 2, skipped: 1 });

        let property = segment.property();
        assert_eq!(property.doc_count, 2);
        assert_eq!(property.token_count, 3);
        let mut donut = segment.get("donut").unwrap().unwrap().ids();
        donut.sort_unstable();
        assert_eq!(donut, vec![2, 3]);
        assert_eq!(segment.get("plate").unwrap().unwrap().ids(), vec![2]);
    }
}
