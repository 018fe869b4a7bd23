use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a document within a corpus
pub type DocId = u32;

/// Stable per-query identifier of a term, used for sparse token-id vectors
pub type TermId = u32;

/// A document as handed to the indexer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    /// Unix seconds; 0 means unspecified
    #[serde(default)]
    pub timestamp: i64,
    /// Static quality signal; term frequency is used when absent
    #[serde(default)]
    pub quality: Option<f64>,
}

impl Document {
    pub fn new(id: DocId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Text fed to the analyzer: title followed by body
    pub fn indexed_text(&self) -> String {
        if self.title.is_empty() {
            self.text.clone()
        } else {
            format!("{}\n{}", self.title, self.text)
        }
    }
}

/// Half-open time interval `[start, end)` a segment is responsible for.
/// `[0, 0)` means "no range constraint".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataRange {
    pub start: i64,
    pub end: i64,
}

impl DataRange {
    pub const UNBOUNDED: DataRange = DataRange { start: 0, end: 0 };

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// The aligned window of `width` seconds containing `timestamp`.
    /// Saturates at the ends of the `i64` range.
    pub fn window(timestamp: i64, width: i64) -> Self {
        let start = timestamp.saturating_sub(timestamp.rem_euclid(width));
        Self {
            start,
            end: start.saturating_add(width),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Whether `other` lies entirely inside this range
    pub fn covers(&self, other: &DataRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Per-segment corpus statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentProperty {
    pub doc_count: u64,
    /// Sum of document lengths; the corpus length in BM25's average-length term
    pub token_count: u64,
    pub data_range: DataRange,
}

impl SegmentProperty {
    pub fn avg_doc_len(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.token_count as f64 / self.doc_count as f64
        }
    }

    /// Combine counts of two segments; the range of `self` is kept
    pub fn merged(&self, other: &SegmentProperty) -> SegmentProperty {
        SegmentProperty {
            doc_count: self.doc_count + other.doc_count,
            token_count: self.token_count + other.token_count,
            data_range: self.data_range,
        }
    }
}

/// Ranking model applied after set algebra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchModel {
    /// Static per-entry score only
    Boolean,
    /// Cosine similarity of idf-weighted term vectors
    VectorSpace,
    /// Okapi BM25
    #[default]
    Bm25,
}

/// Which tier a persisted segment is loaded into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Full,
    Auxiliary,
}

/// Outcome of a batch add
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddReport {
    pub indexed: usize,
    pub skipped: usize,
}

impl AddReport {
    pub fn absorb(&mut self, other: AddReport) {
        self.indexed += other.indexed;
        self.skipped += other.skipped;
    }
}

/// Retrieval-time parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned per query
    pub top_k: usize,
    /// Champion list size per term
    pub champion_size: usize,
    /// Related terms requested from the expansion model
    pub expansion_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            champion_size: 1000,
            expansion_count: 3,
        }
    }
}

/// BM25 free parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 2.0, b: 0.75 }
    }
}

/// Incremental double-buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Bound of each of the two document queues
    pub queue_capacity: usize,
    /// Standby backlog that triggers a buffer swap
    pub swap_threshold: usize,
    /// How long the writer waits on an empty queue before idling
    pub poll_interval_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            swap_threshold: 10,
            poll_interval_ms: 1,
        }
    }
}

/// Knobs passed through to the persistent key-value store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Write buffer size for the value file, in bytes
    pub block_size: usize,
    /// Decoded values kept in the LRU cache
    pub cache_size: usize,
    /// fsync on every drain
    pub sync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            cache_size: 1000,
            sync: false,
        }
    }
}

/// Bulk build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Documents held in memory before spilling to a file
    pub spill_threshold: usize,
    /// Bound of the document and spill-reader channels
    pub channel_capacity: usize,
    /// Merged posting bytes staged before the destination is committed to disk
    pub merge_buffer_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            spill_threshold: 100_000,
            channel_capacity: 64,
            merge_buffer_bytes: 8 << 20,
        }
    }
}

/// Configuration for the index core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub retrieval: RetrievalConfig,
    pub bm25: Bm25Params,
    pub buffer: BufferConfig,
    pub store: StoreConfig,
    pub build: BuildConfig,
    /// Width of an auxiliary segment's time window (seconds)
    pub data_range_secs: i64,
}

impl IndexConfig {
    /// Load from a JSON file; missing sections take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            IndexError::Config(format!("cannot open {}: {}", path.display(), e))
        })?;
        let config: IndexConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(IndexError::Config(msg.to_string()));

        if self.retrieval.top_k == 0 || self.retrieval.champion_size == 0 {
            return fail("retrieval.top_k and retrieval.champion_size must be positive");
        }
        if self.retrieval.champion_size < self.retrieval.top_k {
            return fail("retrieval.champion_size must be at least retrieval.top_k");
        }
        if !(self.bm25.k1 >= 0.0) || !(0.0..=1.0).contains(&self.bm25.b) {
            return fail("bm25.k1 must be >= 0 and bm25.b within [0, 1]");
        }
        if self.buffer.queue_capacity == 0 {
            return fail("buffer.queue_capacity must be positive");
        }
        if self.buffer.swap_threshold >= self.buffer.queue_capacity {
            return fail("buffer.swap_threshold must be below buffer.queue_capacity");
        }
        if self.store.block_size == 0 {
            return fail("store.block_size must be positive");
        }
        if self.build.spill_threshold == 0
            || self.build.channel_capacity == 0
            || self.build.merge_buffer_bytes == 0
        {
            return fail("build thresholds and capacities must be positive");
        }
        if self.data_range_secs <= 0 {
            return fail("data_range_secs must be positive");
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            bm25: Bm25Params::default(),
            buffer: BufferConfig::default(),
            store: StoreConfig::default(),
            build: BuildConfig::default(),
            data_range_secs: 86_400,
        }
    }
}

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
