pub mod expand;
pub mod retrieval;
pub mod scorer;

pub use expand::{Expander, SynonymTable};
pub use retrieval::do_retrieval;
pub use scorer::{TermStats, TermTable};

use crate::index::types::{Bm25Params, IndexConfig, SearchModel};

/// Boolean term roles of a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub must: Vec<String>,
    pub should: Vec<String>,
    pub not: Vec<String>,
}

impl Query {
    pub fn must<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            must: terms.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_should<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.should = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_not<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.not = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty()
    }
}

/// Per-call retrieval parameters
#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Results returned (`k`)
    pub top_k: usize,
    /// Champion list size per term (`r`)
    pub champion_size: usize,
    pub model: SearchModel,
    pub bm25: Bm25Params,
}

impl RetrievalOptions {
    pub fn from_config(config: &IndexConfig, model: SearchModel) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            champion_size: config.retrieval.champion_size,
            model,
            bm25: config.bm25,
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default(), SearchModel::Bm25)
    }
}
