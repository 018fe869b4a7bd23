use thiserror::Error;

/// Errors raised by the index core.
///
/// A term missing from an index is not an error: lookups return `None`
/// and retrieval degrades to an empty contribution.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed summary file or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// A posting list or summary blob failed to decode.
    #[error("corrupt data in {context}: {reason}")]
    CorruptData { context: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A document or spill stream ended without its end marker.
    #[error("stream error: {0}")]
    Stream(String),

    /// A single document was rejected; the index is unaffected.
    #[error("invalid document {id}: {reason}")]
    InvalidDocument { id: u32, reason: String },

    /// The incremental buffer was drained and no longer accepts writes.
    #[error("incremental buffer is closed")]
    BufferClosed,
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn corrupt(context: impl Into<String>, reason: impl Into<String>) -> Self {
        IndexError::CorruptData {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error makes the affected segment unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, IndexError::Config(_) | IndexError::CorruptData { .. })
    }
}
