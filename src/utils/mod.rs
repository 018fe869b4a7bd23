//! Utility functions and data structures.
//!
//! - [`bloom`] - Bloom filter for fast negative term lookups
//! - [`encoding`] - Little-endian field and length-prefixed record helpers
//! - [`progress`] - Progress bars for bulk builds
//! - [`tokenizer`] - The [`Analyzer`] seam and the default analyzer
//!
//! ```no_run
//! use tiersearch::utils::{Analyzer, StandardAnalyzer};
//!
//! let tokens = StandardAnalyzer.analyze("A donut on a glass plate");
//! // Returns: ["donut", "on", "glass", "plate"]
//! ```

pub mod bloom;
pub mod encoding;
pub mod progress;
pub mod tokenizer;

pub use bloom::TermFilter;
pub use encoding::*;
pub use tokenizer::{Analyzer, StandardAnalyzer};
