//! Concurrent dispatch of outbound requests.
//!
//! Every query of a batch gets its own call, started immediately. A call
//! always ends in a `RawResponse`: mocks, timeouts and transport failures are
//! turned into synthetic responses so one slot can never fail its siblings.

use crate::errors::TransportError;
use crate::metrics_defs::QUERY_DURATION;
use crate::query::Query;
use crate::request_spec::OutboundRequestSpec;
use crate::response::RawResponse;
use async_trait::async_trait;
use http::StatusCode;
use shared::histogram;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Performs one outbound call. The real implementation is
/// [`HttpTransport`](crate::http::HttpTransport).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, spec: OutboundRequestSpec) -> Result<RawResponse, TransportError>;
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    /// Caps in-flight network calls for one batch
    limiter: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            transport,
            timeout,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub async fn dispatch(&self, query: &Query, spec: OutboundRequestSpec) -> RawResponse {
        if let Some(mock) = &query.mock_response {
            tracing::debug!(query_ref = %query.r#ref, "Serving inline mock response");
            return RawResponse::synthetic(StatusCode::OK, mock.to_string());
        }

        // The semaphore is never closed, so acquiring only waits for capacity.
        let Ok(_permit) = self.limiter.acquire().await else {
            return RawResponse::synthetic(
                StatusCode::INTERNAL_SERVER_ERROR,
                "dispatcher is shut down",
            );
        };

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.transport.send(spec)).await;

        let (outcome, response) = match result {
            Ok(Ok(response)) => ("completed", response),
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                tracing::warn!(
                    query_ref = %query.r#ref,
                    endpoint = %query.endpoint,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Upstream call timed out"
                );
                ("timeout", self.timeout_response())
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    query_ref = %query.r#ref,
                    endpoint = %query.endpoint,
                    error = %e,
                    "Upstream call failed"
                );
                (
                    "failed",
                    RawResponse::synthetic(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                )
            }
        };

        histogram!(QUERY_DURATION, "outcome" => outcome).record(started.elapsed().as_secs_f64());
        response
    }

    fn timeout_response(&self) -> RawResponse {
        let body = serde_json::json!({
            "message": format!("request timed out after {}ms", self.timeout.as_millis()),
        });
        RawResponse::synthetic(StatusCode::REQUEST_TIMEOUT, body.to_string())
    }
}
