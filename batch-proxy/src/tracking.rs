//! Per-batch activity tracking.

use crate::query::Query;
use crate::response::QueryResponse;
use serde_json::Value;

/// Everything a sink gets to see about one settled batch.
#[derive(Debug)]
pub struct TrackedBatch<'a> {
    pub queries: &'a [Query],
    pub responses: &'a [QueryResponse],
    pub metadata: Option<&'a Value>,
}

/// Receives every batch exactly once, after all of its queries settled.
pub trait TrackingSink: Send + Sync {
    fn track(&self, batch: &TrackedBatch<'_>);
}

/// Writes one structured event per batch to the `tracking` target.
#[derive(Debug, Default)]
pub struct LogTrackingSink;

impl TrackingSink for LogTrackingSink {
    fn track(&self, batch: &TrackedBatch<'_>) {
        let refs: Vec<&str> = batch.queries.iter().map(|q| q.r#ref.as_str()).collect();
        let statuses: Vec<u16> = batch.responses.iter().map(|r| r.meta.status_code).collect();
        let errors: Vec<&str> = batch
            .responses
            .iter()
            .filter_map(|r| r.error.as_deref())
            .collect();
        let metadata = batch.metadata.map(Value::to_string).unwrap_or_default();

        tracing::info!(
            target: "tracking",
            refs = ?refs,
            statuses = ?statuses,
            errors = ?errors,
            metadata = %metadata,
            "api batch"
        );
    }
}

#[derive(Debug, Default)]
pub struct NoopTrackingSink;

impl TrackingSink for NoopTrackingSink {
    fn track(&self, _batch: &TrackedBatch<'_>) {}
}
