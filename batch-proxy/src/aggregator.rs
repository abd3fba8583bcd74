//! Ordered collection of per-query results.
//!
//! Slots are addressed by query index, so responses come back in request
//! order no matter which call finishes first. Each slot settles once.

use crate::query::Query;
use crate::response::QueryResponse;
use http::StatusCode;

#[derive(Debug)]
pub struct Aggregator {
    slots: Vec<Option<QueryResponse>>,
}

impl Aggregator {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    /// Stores the result for `index`. Returns false if the slot was already
    /// settled or does not exist; the first result is kept.
    pub fn settle(&mut self, index: usize, response: QueryResponse) -> bool {
        match self.slots.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(response);
                true
            }
            Some(Some(_)) => {
                tracing::warn!(index, "Ignoring duplicate result for settled query");
                false
            }
            None => {
                tracing::warn!(index, slots = self.slots.len(), "Result for unknown query slot");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Consumes the aggregator. Any slot still empty (its task died before
    /// settling) becomes a 500 error so the output always matches the input.
    pub fn finish(self, queries: &[Query]) -> Vec<QueryResponse> {
        self.slots
            .into_iter()
            .zip(queries)
            .enumerate()
            .map(|(index, (slot, query))| {
                slot.unwrap_or_else(|| {
                    tracing::error!(index, query_ref = %query.r#ref, "Query never settled");
                    QueryResponse::failed(
                        query,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "query did not complete".to_string(),
                    )
                })
            })
            .collect()
    }
}
