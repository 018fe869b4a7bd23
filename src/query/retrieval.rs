//! Query execution against a single segment.
//!
//! 1. must-terms: champions, storage order, intersect (first one seeds)
//! 2. should-terms: champions, storage order, union
//! 3. not-terms: full list, storage order, difference
//! 4. re-rank with the selected model, sort by score, cut to `top_k`
//!
//! A must-term with no postings empties the must side for the rest of the
//! query; should-terms can still bring documents back in.

use crate::error::Result;
use crate::index::posting::PostingList;
use crate::index::segment::Segment;
use crate::index::types::SearchModel;
use crate::query::scorer::TermTable;
use crate::query::{Query, RetrievalOptions};
use tracing::trace;

pub fn do_retrieval<S: Segment + ?Sized>(
    segment: &S,
    query: &Query,
    options: &RetrievalOptions,
) -> Result<PostingList> {
    let property = segment.property();
    let mut table = TermTable::new();

    // None until the first must-term is seen
    let mut must: Option<PostingList> = None;
    for term in &query.must {
        table.record_query_term(term);
        let Some(postings) = segment.get(term)? else {
            trace!(term = %term, "must-term absent");
            must = Some(PostingList::new());
            continue;
        };

        let doc_freq = postings.len() as u64;
        let mut champions = postings.champions(options.champion_size);
        champions.sort_by_doc_id();
        table.record(term, property.doc_count, doc_freq, &champions);

        must = Some(match must {
            None => champions,
            Some(mut acc) => {
                acc.intersect(&champions);
                acc
            }
        });
    }

    let mut result = must.unwrap_or_default();
    for term in &query.should {
        table.record_query_term(term);
        let Some(postings) = segment.get(term)? else {
            continue;
        };

        let doc_freq = postings.len() as u64;
        let mut champions = postings.champions(options.champion_size);
        champions.sort_by_doc_id();
        table.record(term, property.doc_count, doc_freq, &champions);
        result.union(&champions);
    }

    for term in &query.not {
        if let Some(mut postings) = segment.get(term)? {
            postings.sort_by_doc_id();
            result.difference(&postings);
        }
    }

    match options.model {
        SearchModel::Bm25 => {
            let avg_doc_len = property.avg_doc_len();
            for posting in result.iter_mut() {
                posting.score = table.bm25(posting, avg_doc_len, &options.bm25);
            }
        }
        SearchModel::VectorSpace => {
            for posting in result.iter_mut() {
                posting.score = table.cosine(posting.doc_id);
            }
        }
        SearchModel::Boolean => {}
    }

    result.sort_by_score();
    result.truncate(options.top_k);
    Ok(result)
}
