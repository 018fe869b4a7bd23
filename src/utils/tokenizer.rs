/// Maximum token length to store in the index.
/// Tokens longer than this are likely base64, hashes, or other non-searchable content.
const MAX_TOKEN_LENGTH: usize = 128;

/// Words too common to carry any retrieval signal
const STOP_WORDS: &[&str] = &["a", "and", "be", "have", "i", "in", "of", "that", "the", "to"];

/// Turns raw text into the ordered sequence of normalized index terms.
///
/// Duplicates are kept: segments derive term frequency and document length
/// from the returned sequence.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<String>;
}

/// Default analyzer: splits on anything that is not a letter or digit,
/// lowercases, and drops stop words and over-long tokens. No stemming.
#[derive(Debug, Clone, Default)]
pub struct StandardAnalyzer;

impl StandardAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty() && word.len() <= MAX_TOKEN_LENGTH)
            .map(|word| word.to_lowercase())
            .filter(|token| !is_stop_word(token))
            .collect()
    }
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}
