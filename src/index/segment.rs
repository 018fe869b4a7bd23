use crate::error::Result;
use crate::index::posting::PostingList;
use crate::index::types::{AddReport, Document, SegmentProperty};
use crate::query::{Query, RetrievalOptions, do_retrieval};

/// Uniform contract of every segment kind.
///
/// Methods take `&self`; implementations guard their interior so that
/// readers holding an `Arc` keep working while a writer adds documents.
pub trait Segment: Send + Sync {
    /// Tokenize and index a batch. Documents that cannot be indexed are
    /// skipped and counted rather than failing the batch.
    fn add(&self, docs: &[Document]) -> Result<AddReport>;

    /// Postings for `term` in quality order with scores reset, or `None`
    fn get(&self, term: &str) -> Result<Option<PostingList>>;

    fn property(&self) -> SegmentProperty;

    /// Every indexed term, ascending
    fn keys(&self) -> Vec<String>;

    /// Drop every posting and reset counts
    fn clear(&self) -> Result<()>;

    /// Ranked top-k for `query`
    fn retrieval(&self, query: &Query, options: &RetrievalOptions) -> Result<PostingList> {
        do_retrieval(self, query, options)
    }
}
