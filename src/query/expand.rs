use crate::error::{IndexError, Result};
use ahash::AHashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Semantic expansion model used to build the should-set of a query
pub trait Expander: Send + Sync {
    /// Up to `count` terms related to `terms`, most related first.
    /// Never returns a term already in `terms`.
    fn similar(&self, terms: &[String], count: usize) -> Vec<String>;
}

/// Expansion from a static synonym table.
///
/// Loaded from a JSON object mapping each term to its related terms in
/// order of relatedness:
///
/// ```json
/// { "donut": ["doughnut", "cruller"], "plate": ["dish"] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    related: AHashMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new(related: AHashMap<String, Vec<String>>) -> Self {
        Self { related }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            IndexError::Config(format!("cannot open synonym table {}: {}", path.display(), e))
        })?;
        let related: AHashMap<String, Vec<String>> = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self { related })
    }

    pub fn len(&self) -> usize {
        self.related.len()
    }

    pub fn is_empty(&self) -> bool {
        self.related.is_empty()
    }
}

impl Expander for SynonymTable {
    fn similar(&self, terms: &[String], count: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(count);
        // Round-robin over the terms so every term gets its closest neighbour first
        let lists: Vec<&Vec<String>> = terms.iter().filter_map(|t| self.related.get(t)).collect();
        let depth = lists.iter().map(|l| l.len()).max().unwrap_or(0);

        'outer: for rank in 0..depth {
            for list in &lists {
                if out.len() >= count {
                    break 'outer;
                }
                if let Some(candidate) = list.get(rank) {
                    if !terms.contains(candidate) && !out.contains(candidate) {
                        out.push(candidate.clone());
                    }
                }
            }
        }
        out
    }
}
