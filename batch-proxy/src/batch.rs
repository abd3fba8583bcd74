//! One batch, end to end.
//!
//! Validated queries are fanned out as one task each on a `JoinSet`. Every
//! task runs build, dispatch, parse, cookie bridge and augment for its query
//! and hands back its slot index; draining the set is the join barrier.

use crate::aggregator::Aggregator;
use crate::config::{ApiConfig, Config};
use crate::context::{InboundRequest, RequestContext, Upload};
use crate::cookies::{CookiePolicy, CookieWrite, bridge_cookies};
use crate::dispatcher::{Dispatcher, Transport};
use crate::duotone::{DuotoneTable, ResponseAugmenter};
use crate::errors::BatchError;
use crate::http::HttpTransport;
use crate::metrics_defs::{BATCH_DURATION, BATCH_QUERIES, BATCHES_INFLIGHT, QUERY_OUTCOMES};
use crate::query::{Query, validate_queries};
use crate::request_spec::OutboundRequestSpec;
use crate::response::{QueryResponse, RawResponse, parse_response};
use crate::tracking::{TrackedBatch, TrackingSink};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use shared::{counter, gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// The answer to one batch: responses in query order, plus the cookies the
/// caller-facing response must set.
#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub responses: Vec<QueryResponse>,
    #[serde(skip)]
    pub cookies: Vec<CookieWrite>,
}

#[derive(Clone)]
pub struct BatchProxy {
    api: ApiConfig,
    cookie_policy: CookiePolicy,
    transport: Arc<dyn Transport>,
    augmenter: ResponseAugmenter,
    tracking: Arc<dyn TrackingSink>,
}

impl BatchProxy {
    pub fn new(
        api: ApiConfig,
        cookie_policy: CookiePolicy,
        transport: Arc<dyn Transport>,
        duotone: Arc<DuotoneTable>,
        tracking: Arc<dyn TrackingSink>,
    ) -> Self {
        Self {
            api,
            cookie_policy,
            transport,
            augmenter: ResponseAugmenter::new(duotone),
            tracking,
        }
    }

    /// Wires the real HTTP transport and the duotone table from configuration.
    pub fn from_config(
        config: &Config,
        tracking: Arc<dyn TrackingSink>,
    ) -> Result<Self, BatchError> {
        let duotone = Arc::new(DuotoneTable::from_config(&config.duotone));
        tracing::info!(pairs = duotone.len(), "Loaded duotone table");

        Ok(Self::new(
            config.api.clone(),
            CookiePolicy {
                secure: config.cookies.secure,
            },
            Arc::new(HttpTransport::new()?),
            duotone,
            tracking,
        ))
    }

    /// Runs the batch on a task of its own: once started, every call settles,
    /// tracking fires and uploads are removed even if the caller goes away.
    pub async fn run_batch(
        &self,
        raw_queries: &Value,
        inbound: InboundRequest,
    ) -> Result<BatchResult, BatchError> {
        let proxy = self.clone();
        let raw_queries = raw_queries.clone();

        tokio::spawn(async move { proxy.settle_batch(&raw_queries, inbound).await })
            .await
            .map_err(|e| BatchError::InternalError(format!("batch task failed: {e}")))?
    }

    async fn settle_batch(
        &self,
        raw_queries: &Value,
        inbound: InboundRequest,
    ) -> Result<BatchResult, BatchError> {
        let started = Instant::now();
        let uploads = inbound.uploads.clone();

        let result = self.execute(raw_queries, inbound).await;

        remove_uploads(&uploads).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(BatchError::Validation(_)) => "invalid",
            Err(_) => "error",
        };
        histogram!(BATCH_DURATION, "status" => status).record(started.elapsed().as_secs_f64());

        result
    }

    async fn execute(
        &self,
        raw_queries: &Value,
        inbound: InboundRequest,
    ) -> Result<BatchResult, BatchError> {
        let queries = validate_queries(raw_queries)?;
        let context = Arc::new(RequestContext::build(&inbound, &self.api)?);

        histogram!(BATCH_QUERIES).record(queries.len() as f64);
        gauge!(BATCHES_INFLIGHT).increment(1.0);

        let dispatcher = Dispatcher::new(
            self.transport.clone(),
            Duration::from_millis(self.api.timeout_ms),
            self.api.max_concurrency,
        );

        let mut join_set = JoinSet::new();
        let mut task_indexes = HashMap::new();

        for (index, query) in queries.iter().cloned().enumerate() {
            let task = QueryTask {
                query,
                context: context.clone(),
                dispatcher: dispatcher.clone(),
                augmenter: self.augmenter.clone(),
                cookie_policy: self.cookie_policy,
            };
            let handle = join_set.spawn(async move { (index, task.run().await) });
            task_indexes.insert(handle.id(), index);
        }

        let mut aggregator = Aggregator::new(queries.len());
        let mut cookies = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, (response, writes))) => {
                    let result = if response.error.is_some() { "error" } else { "value" };
                    counter!(QUERY_OUTCOMES, "result" => result).increment(1);
                    if aggregator.settle(index, response) {
                        cookies.extend(writes);
                    }
                }
                Err(e) => tracing::error!(
                    index = ?task_indexes.get(&e.id()),
                    error = %e,
                    "Query task failed"
                ),
            }
        }

        let responses = aggregator.finish(&queries);

        self.tracking.track(&TrackedBatch {
            queries: &queries,
            responses: &responses,
            metadata: inbound.metadata.as_ref(),
        });

        gauge!(BATCHES_INFLIGHT).decrement(1.0);

        Ok(BatchResult { responses, cookies })
    }
}

/// Everything one query needs, owned so it can move into its task.
struct QueryTask {
    query: Query,
    context: Arc<RequestContext>,
    dispatcher: Dispatcher,
    augmenter: ResponseAugmenter,
    cookie_policy: CookiePolicy,
}

impl QueryTask {
    async fn run(self) -> (QueryResponse, Vec<CookieWrite>) {
        let raw = match OutboundRequestSpec::build(&self.query, &self.context) {
            Ok(spec) => self.dispatcher.dispatch(&self.query, spec).await,
            Err(e) => {
                tracing::warn!(query_ref = %self.query.r#ref, error = %e, "Could not build request");
                RawResponse::synthetic(StatusCode::BAD_REQUEST, e.to_string())
            }
        };

        let mut response = parse_response(&self.query, &raw);
        let cookies = raw
            .cookies
            .as_deref()
            .map(|captured| bridge_cookies(captured, self.cookie_policy))
            .unwrap_or_default();
        self.augmenter.augment(&mut response);

        (response, cookies)
    }
}

async fn remove_uploads(uploads: &[Upload]) {
    for upload in uploads {
        if let Err(e) = tokio::fs::remove_file(&upload.path).await {
            tracing::warn!(
                path = %upload.path.display(),
                error = %e,
                "Failed to remove spooled upload"
            );
        }
    }
}
