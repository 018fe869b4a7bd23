pub mod buffer;
pub mod build;
pub mod disk;
pub mod memory;
pub mod posting;
pub mod searcher;
pub mod segment;
pub mod stats;
pub mod store;
pub mod summary;
pub mod types;

pub use buffer::DoubleBuffer;
pub use build::{BuildReport, StreamMessage, build_index, merge_index};
pub use disk::DiskSegment;
pub use memory::MemorySegment;
pub use posting::{POSTING_SIZE, Posting, PostingList};
pub use searcher::{AuxiliaryArray, Searcher};
pub use segment::Segment;
pub use store::{FileStore, KvStore};
pub use types::*;
