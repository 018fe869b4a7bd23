//! # tiersearch - Tiered Full-Text Search Engine
//!
//! An inverted index split across three tiers, queried together:
//!
//! 1. **Full** - one large on-disk segment, built offline from a document stream
//! 2. **Auxiliary** - on-disk segments, each covering one time window
//! 3. **Incremental** - a double-buffered in-memory segment taking real-time adds
//!
//! When a document arrives past the incremental window, the buffer is
//! rotated out and drained into the auxiliary tier on a background thread.
//!
//! ## Architecture
//!
//! - [`index`] - Postings, segments, the bulk build and the [`Searcher`](index::Searcher)
//! - [`query`] - Boolean / vector-space / BM25 retrieval and query expansion
//! - [`utils`] - Analyzer, bloom filter, on-disk encoding helpers
//! - [`error`] - The crate's error type
//!
//! ## Quick Start
//!
//! ```no_run
//! use tiersearch::index::{Document, IndexConfig, SearchModel, Searcher};
//! use tiersearch::query::Query;
//! use std::path::Path;
//!
//! let searcher = Searcher::open(Path::new("/tmp/news/full"), IndexConfig::default()).unwrap();
//! searcher.add(Document::new(1, "A donut on a glass plate")).unwrap();
//!
//! let hits = searcher
//!     .retrieval(&Query::must(["donut"]), SearchModel::Bm25)
//!     .unwrap();
//! for posting in hits.iter() {
//!     println!("{} {:.3}", posting.doc_id, posting.score);
//! }
//! searcher.close().unwrap();
//! ```
//!
//! Retrieval reads a stable snapshot of every tier: the incremental writer
//! only ever mutates the side readers are not looking at, and segments
//! replaced by a load or a drain stay readable until the last handle drops.

pub mod error;
pub mod index;
pub mod query;
pub mod utils;

pub use error::{IndexError, Result};
