//! Three-tier segment topology.
//!
//! - full: one persistent segment, replaced wholesale by `load`
//! - auxiliary: disk segments partitioned by data range, fed by drains
//! - incremental: a double buffer taking real-time writes
//!
//! Every tier is held behind a handle that can be swapped atomically.
//! A reader loads each handle once per operation and keeps using that
//! snapshot even if a drain or load replaces it meanwhile.

use crate::error::{IndexError, Result};
use crate::index::buffer::DoubleBuffer;
use crate::index::disk::DiskSegment;
use crate::index::posting::PostingList;
use crate::index::segment::Segment;
use crate::index::store::suffixed;
use crate::index::types::{
    DataRange, DocId, Document, IndexConfig, SearchModel, SegmentProperty, Tier, unix_now,
};
use crate::query::{Expander, Query, RetrievalOptions};
use crate::utils::{Analyzer, StandardAnalyzer};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use std::cmp::Ordering as CmpOrdering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Auxiliary segments; mutations take the write lock, readers copy a snapshot
#[derive(Default)]
pub struct AuxiliaryArray {
    segments: RwLock<Vec<Arc<DiskSegment>>>,
}

impl AuxiliaryArray {
    pub fn snapshot(&self) -> Vec<Arc<DiskSegment>> {
        self.segments.read().clone()
    }

    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }

    pub fn add(&self, segment: Arc<DiskSegment>) {
        self.segments.write().push(segment);
    }

    /// First segment whose range covers `range`
    pub fn hit(&self, range: &DataRange) -> Option<Arc<DiskSegment>> {
        self.segments
            .read()
            .iter()
            .find(|s| s.data_range().covers(range))
            .cloned()
    }

    /// Replace `old` with `new`; false when `old` is no longer present
    pub fn swap(&self, old: &Arc<DiskSegment>, new: Arc<DiskSegment>) -> bool {
        let mut segments = self.segments.write();
        match segments.iter_mut().find(|s| Arc::ptr_eq(s, old)) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }

    /// Remove and return every segment whose range lies inside `range`
    pub fn evict(&self, range: &DataRange) -> Vec<Arc<DiskSegment>> {
        let mut segments = self.segments.write();
        let (evicted, kept): (Vec<_>, Vec<_>) = segments
            .drain(..)
            .partition(|s| range.covers(&s.data_range()));
        *segments = kept;
        evicted
    }
}

struct SearcherInner {
    base: PathBuf,
    config: IndexConfig,
    analyzer: Arc<dyn Analyzer>,
    expander: Option<Arc<dyn Expander>>,
    full: ArcSwap<DiskSegment>,
    aux: AuxiliaryArray,
    incremental: ArcSwap<DoubleBuffer>,
    /// Buffers swapped out but not yet merged into an auxiliary segment
    draining: RwLock<Vec<Arc<DoubleBuffer>>>,
    tombstones: RwLock<RoaringBitmap>,
    aux_seq: AtomicU64,
    /// Held from `hit` through `swap`/`add` so one window never gets two segments
    publish: Mutex<()>,
}

/// Live index over the three tiers
pub struct Searcher {
    inner: Arc<SearcherInner>,
    drains: Mutex<Vec<JoinHandle<Result<()>>>>,
}

impl Searcher {
    /// Open the index at `base` with the default analyzer and no expansion model
    pub fn open(base: &Path, config: IndexConfig) -> Result<Self> {
        Self::open_with(base, config, Arc::new(StandardAnalyzer), None)
    }

    pub fn open_with(
        base: &Path,
        config: IndexConfig,
        analyzer: Arc<dyn Analyzer>,
        expander: Option<Arc<dyn Expander>>,
    ) -> Result<Self> {
        config.validate()?;

        let full = DiskSegment::open_with(base, &config.store, analyzer.clone())?;
        let window = DataRange::window(unix_now(), config.data_range_secs);
        let incremental = DoubleBuffer::new(window, &config.buffer, analyzer.clone())?;

        let inner = SearcherInner {
            base: base.to_path_buf(),
            full: ArcSwap::from_pointee(full),
            aux: AuxiliaryArray::default(),
            incremental: ArcSwap::from_pointee(incremental),
            draining: RwLock::new(Vec::new()),
            tombstones: RwLock::new(RoaringBitmap::new()),
            aux_seq: AtomicU64::new(0),
            publish: Mutex::new(()),
            config,
            analyzer,
            expander,
        };

        let found = discover_auxiliary(base)?;
        let next_seq = found.iter().map(|(seq, _)| seq + 1).max().unwrap_or(0);
        inner.aux_seq.store(next_seq, Ordering::Relaxed);
        for (_, path) in found {
            inner.load(&path, Tier::Auxiliary)?;
        }
        info!(
            base = %base.display(),
            docs = inner.full.load().property().doc_count,
            auxiliary = inner.aux.len(),
            "opened searcher"
        );

        Ok(Self {
            inner: Arc::new(inner),
            drains: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    pub fn full(&self) -> Arc<DiskSegment> {
        self.inner.full.load_full()
    }

    pub fn auxiliary(&self) -> Vec<Arc<DiskSegment>> {
        self.inner.aux.snapshot()
    }

    pub fn incremental(&self) -> Arc<DoubleBuffer> {
        self.inner.incremental.load_full()
    }

    /// Index a document in real time. A timestamp past the incremental
    /// buffer's range drains the buffer first.
    pub fn add(&self, doc: Document) -> Result<()> {
        if doc.timestamp.checked_add(self.inner.config.data_range_secs).is_none() {
            return Err(IndexError::InvalidDocument {
                id: doc.id,
                reason: format!("timestamp {} has no representable window", doc.timestamp),
            });
        }
        loop {
            let incremental = self.inner.incremental.load_full();
            let range = incremental.data_range();
            if doc.timestamp != 0 && !range.is_unbounded() && doc.timestamp >= range.end {
                self.rotate(&incremental, doc.timestamp)?;
                continue;
            }

            match incremental.enqueue(&doc) {
                Err(IndexError::BufferClosed) => {
                    // closed by a drain, which installs the replacement first;
                    // a closed buffer that is still current means the searcher is closed
                    if Arc::ptr_eq(&self.inner.incremental.load(), &incremental) {
                        return Err(IndexError::BufferClosed);
                    }
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Mark a document deleted. Its postings stay in place.
    pub fn del(&self, doc_id: DocId) {
        self.inner.tombstones.write().insert(doc_id);
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.inner.tombstones.read().contains(doc_id)
    }

    /// Documents indexed across full, auxiliary and incremental tiers
    pub fn count(&self) -> u64 {
        let full = self.inner.full.load().property().doc_count;
        let aux: u64 = self
            .inner
            .aux
            .snapshot()
            .iter()
            .map(|s| s.property().doc_count)
            .sum();
        let incremental = self.inner.incremental.load().property().doc_count;
        full + aux + incremental
    }

    /// Swap in a fresh incremental buffer scoped to the window holding
    /// `cutoff` (0 means now) and merge the old one into the auxiliary tier
    /// on a background thread.
    pub fn drain(&self, cutoff: i64) -> Result<()> {
        let incremental = self.inner.incremental.load_full();
        let cutoff = if cutoff == 0 { unix_now() } else { cutoff };
        self.rotate(&incremental, cutoff)?;
        Ok(())
    }

    /// Join every drain started so far, returning the first failure
    pub fn wait_for_drains(&self) -> Result<()> {
        let handles: Vec<_> = self.drains.lock().drain(..).collect();
        let mut first_err = None;
        for handle in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(IndexError::Stream("drain thread panicked".to_string())));
            if let Err(e) = outcome {
                warn!(error = %e, "drain failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn load(&self, path: &Path, tier: Tier) -> Result<()> {
        self.inner.load(path, tier)
    }

    /// Top-k across every tier with tombstones removed
    pub fn retrieval(&self, query: &Query, model: SearchModel) -> Result<PostingList> {
        let options = RetrievalOptions::from_config(&self.inner.config, model);
        // each tier keeps `r` candidates so deleted hits cannot crowd out the global top-k
        let per_tier = RetrievalOptions {
            top_k: options.champion_size,
            ..options
        };

        let full = self.inner.full.load_full();
        let aux = self.inner.aux.snapshot();
        let incremental = self.inner.incremental.load_full();
        let draining = self.inner.draining.read().clone();

        let mut tiers: Vec<PostingList> = Vec::with_capacity(aux.len() + draining.len() + 2);
        tiers.push(full.retrieval(query, &per_tier)?);
        for segment in &aux {
            tiers.push(segment.retrieval(query, &per_tier)?);
        }
        tiers.push(incremental.stable().retrieval(query, &per_tier)?);
        for buffer in &draining {
            tiers.push(buffer.stable().retrieval(query, &per_tier)?);
        }

        // union in tier order, so on a shared document the earlier tier wins
        let mut merged = PostingList::new();
        for mut result in tiers {
            result.sort_by_doc_id();
            merged.union(&result);
        }

        let tombstones = self.inner.tombstones.read();
        if !tombstones.is_empty() {
            merged.retain(|p| !tombstones.contains(p.doc_id));
        }
        drop(tombstones);

        merged.sort_by_score();
        merged.truncate(options.top_k);
        Ok(merged)
    }

    /// Analyze `text` into must-terms, expand it into should-terms, and
    /// rank with BM25
    pub fn search(&self, text: &str) -> Result<PostingList> {
        let must = self.inner.analyzer.analyze(text);
        let should = match &self.inner.expander {
            Some(expander) => expander.similar(&must, self.inner.config.retrieval.expansion_count),
            None => Vec::new(),
        };
        debug!(?must, ?should, "search");

        let query = Query {
            must,
            should,
            not: Vec::new(),
        };
        if query.is_empty() {
            return Ok(PostingList::new());
        }
        self.retrieval(&query, SearchModel::Bm25)
    }

    /// Remove every posting from every tier, including files on disk
    pub fn clear(&self) -> Result<()> {
        self.wait_for_drains()?;
        self.inner.full.load().clear()?;
        for segment in self.inner.aux.snapshot() {
            segment.clear()?;
        }
        self.inner.incremental.load().clear()
    }

    /// Drain pending real-time writes, then persist every disk tier
    pub fn close(&self) -> Result<()> {
        let incremental = self.inner.incremental.load_full();
        incremental.flush()?;
        if incremental.property().doc_count > 0 {
            self.drain(incremental.data_range().start)?;
        }
        self.wait_for_drains()?;
        self.inner.incremental.load().stop()?;

        self.inner.full.load().close()?;
        for segment in self.inner.aux.snapshot() {
            segment.close()?;
        }
        info!(base = %self.inner.base.display(), docs = self.count(), "closed searcher");
        Ok(())
    }

    /// Install a new incremental buffer if `current` is still the live one,
    /// then merge `current` in the background
    fn rotate(&self, current: &Arc<DoubleBuffer>, cutoff: i64) -> Result<bool> {
        let inner = &self.inner;
        let window = DataRange::window(cutoff, inner.config.data_range_secs);
        let fresh = Arc::new(DoubleBuffer::new(
            window,
            &inner.config.buffer,
            inner.analyzer.clone(),
        )?);

        let previous = inner.incremental.compare_and_swap(current, fresh);
        if !Arc::ptr_eq(&previous, current) {
            // another writer drained first
            return Ok(false);
        }
        inner.draining.write().push(Arc::clone(current));
        info!(
            from = current.data_range().start,
            to = window.start,
            "draining incremental buffer"
        );

        let worker = Arc::clone(inner);
        let old = Arc::clone(current);
        let handle = thread::Builder::new()
            .name("drain".to_string())
            .spawn(move || worker.merge_incremental(old))?;
        self.drains.lock().push(handle);
        Ok(true)
    }
}

impl SearcherInner {
    fn next_aux_path(&self, range_start: i64) -> PathBuf {
        let seq = self.aux_seq.fetch_add(1, Ordering::Relaxed);
        suffixed(&self.base, &format!(".aux.{}.{}", range_start, seq))
    }

    fn load(&self, path: &Path, tier: Tier) -> Result<()> {
        let segment = Arc::new(DiskSegment::open_with(
            path,
            &self.config.store,
            self.analyzer.clone(),
        )?);

        match tier {
            Tier::Auxiliary => {
                let _publish = self.publish.lock();
                let range = segment.data_range();
                for evicted in self.aux.evict(&range) {
                    if evicted.base() != segment.base() {
                        info!(base = %evicted.base().display(), "evicting superseded auxiliary segment");
                        evicted.retire();
                    }
                }
                self.aux.add(segment);
            }
            Tier::Full => {
                let old = self.full.swap(Arc::clone(&segment));
                if old.base() != segment.base() {
                    old.retire();
                }
                info!(base = %path.display(), docs = segment.property().doc_count, "loaded full segment");
            }
        }
        Ok(())
    }

    fn merge_incremental(&self, old: Arc<DoubleBuffer>) -> Result<()> {
        old.close();
        old.flush()?;
        old.stop()?;

        if let Err(e) = self.publish_incremental(&old) {
            // stays in `draining` so its documents remain searchable
            error!(start = old.data_range().start, error = %e, "failed to publish drained buffer");
            return Err(e);
        }
        self.draining.write().retain(|b| !Arc::ptr_eq(b, &old));
        old.clear()
    }

    fn publish_incremental(&self, old: &DoubleBuffer) -> Result<()> {
        let range = old.data_range();
        let stable = old.stable();
        let added = stable.property();
        if added.doc_count == 0 {
            debug!(start = range.start, "incremental buffer empty, nothing to merge");
            return Ok(());
        }
        let fresh_entries = stable.sorted_entries();

        let _publish = self.publish.lock();
        match self.aux.hit(&range) {
            Some(existing) => {
                let merged = DiskSegment::create(
                    &self.next_aux_path(existing.data_range().start),
                    &self.config.store,
                    self.analyzer.clone(),
                )?;
                let entries = merge_entries(existing.entries()?, fresh_entries);
                for (term, postings) in &entries {
                    merged.insert_list(term, postings)?;
                }
                merged.set_property(existing.property().merged(&added));
                merged.flush()?;

                let merged = Arc::new(merged);
                if self.aux.swap(&existing, Arc::clone(&merged)) {
                    existing.retire();
                } else {
                    warn!(
                        start = range.start,
                        "covering auxiliary segment was replaced during the drain, appending"
                    );
                    self.aux.add(Arc::clone(&merged));
                }
                info!(
                    base = %merged.base().display(),
                    docs = merged.property().doc_count,
                    terms = entries.len(),
                    "merged incremental buffer into auxiliary segment"
                );
            }
            None => {
                let segment = DiskSegment::create(
                    &self.next_aux_path(range.start),
                    &self.config.store,
                    self.analyzer.clone(),
                )?;
                for (term, postings) in &fresh_entries {
                    segment.insert_list(term, postings)?;
                }
                segment.set_property(SegmentProperty {
                    data_range: range,
                    ..added
                });
                segment.flush()?;
                info!(
                    base = %segment.base().display(),
                    docs = added.doc_count,
                    terms = fresh_entries.len(),
                    "created auxiliary segment"
                );
                self.aux.add(Arc::new(segment));
            }
        }
        Ok(())
    }
}

/// Merge two term-sorted entry lists. On a shared term the lists are
/// unioned with `newer` winning on a shared document.
fn merge_entries(
    older: Vec<(String, PostingList)>,
    newer: Vec<(String, PostingList)>,
) -> Vec<(String, PostingList)> {
    let mut merged = Vec::with_capacity(older.len().max(newer.len()));
    let mut older = older.into_iter().peekable();
    let mut newer = newer.into_iter().peekable();

    loop {
        let order = match (older.peek(), newer.peek()) {
            (Some(o), Some(n)) => o.0.cmp(&n.0),
            (Some(_), None) => CmpOrdering::Less,
            (None, Some(_)) => CmpOrdering::Greater,
            (None, None) => break,
        };
        match order {
            CmpOrdering::Less => merged.extend(older.next()),
            CmpOrdering::Greater => merged.extend(newer.next()),
            CmpOrdering::Equal => {
                if let (Some((term, old_list)), Some((_, mut new_list))) = (older.next(), newer.next()) {
                    new_list.union(&old_list);
                    merged.push((term, new_list));
                }
            }
        }
    }
    merged
}

/// Auxiliary segments persisted next to `base`, as `(sequence, path)` in sequence order
fn discover_auxiliary(base: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let Some(name) = base.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{}.aux.", name);
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(rest) = file_name
            .strip_prefix(&prefix)
            .and_then(|r| r.strip_suffix(".sum"))
        else {
            continue;
        };
        let Some((start, seq)) = rest.rsplit_once('.') else {
            continue;
        };
        if let (Ok(_), Ok(seq)) = (start.parse::<i64>(), seq.parse::<u64>()) {
            found.push((seq, suffixed(base, &format!(".aux.{}", rest))));
        }
    }
    found.sort_by_key(|(seq, _)| *seq);
    Ok(found)
}
