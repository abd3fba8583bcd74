use crate::batch::{BatchProxy, BatchResult};
use crate::config::{AuthConfig, Config};
use crate::context::{Identity, InboundRequest};
use crate::errors::BatchError;
use http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, SET_COOKIE};
use http::request::Parts;
use http::{HeaderValue, Method};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use shared::http::make_boxed_error_response;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct BatchRequest {
    queries: Value,
    #[serde(default)]
    metadata: Option<Value>,
}

/// Serves `POST <batch_path>` on top of [`BatchProxy::run_batch`].
pub struct BatchService {
    proxy: Arc<BatchProxy>,
    batch_path: String,
    auth: AuthConfig,
    client_ip_override_param: String,
}

impl BatchService {
    pub fn new(proxy: Arc<BatchProxy>, config: &Config) -> Self {
        Self {
            proxy,
            batch_path: config.batch_path.clone(),
            auth: config.auth.clone(),
            client_ip_override_param: config.api.client_ip_override_param.clone(),
        }
    }

    fn inbound(&self, parts: Parts) -> InboundRequest {
        let identity = Identity::from_headers(&parts.headers, &self.auth);

        // First tag of the caller's preference list, e.g. `fr-FR,fr;q=0.9` -> `fr-FR`
        let language = parts
            .headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split([',', ';']).next())
            .map(str::trim)
            .filter(|tag| !tag.is_empty() && *tag != "*")
            .map(str::to_string);

        let client_ip_override = parts.uri.query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| *key == self.client_ip_override_param)
                .map(|(_, value)| value.into_owned())
        });

        InboundRequest {
            headers: parts.headers,
            version: parts.version,
            identity,
            language,
            client_ip_override,
            uploads: Vec::new(),
            metadata: None,
        }
    }
}

impl<B> Service<Request<B>> for BatchService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = Response<BoxBody<Bytes, BatchError>>;
    type Error = BatchError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        if req.uri().path() != self.batch_path {
            return Box::pin(async { Ok(make_boxed_error_response(StatusCode::NOT_FOUND)) });
        }
        if req.method() != Method::POST {
            return Box::pin(async {
                Ok(make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED))
            });
        }

        let proxy = self.proxy.clone();
        let (parts, body) = req.into_parts();
        let mut inbound = self.inbound(parts);

        Box::pin(async move {
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return Err(BatchError::RequestBodyError(e.to_string())),
            };

            let request: BatchRequest = match serde_json::from_slice(&body) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(error = %e, "Undecodable batch body");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": format!("invalid request body: {e}")}),
                    ));
                }
            };

            inbound.metadata = request.metadata;
            match proxy.run_batch(&request.queries, inbound).await {
                Ok(result) => batch_response(&result),
                Err(e @ BatchError::Validation(_)) => {
                    tracing::debug!(error = %e, "Rejected batch");
                    Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": e.to_string()}),
                    ))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Batch failed");
                    Ok(make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR))
                }
            }
        })
    }
}

fn batch_response(result: &BatchResult) -> Result<Response<BoxBody<Bytes, BatchError>>, BatchError> {
    let body = serde_json::to_vec(result)?;
    let mut response = Response::new(full(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for cookie in &result.cookies {
        match cookie.to_header_value() {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(name = %cookie.name, "Dropping cookie with invalid value"),
        }
    }

    Ok(response)
}

fn json_response(status: StatusCode, value: &Value) -> Response<BoxBody<Bytes, BatchError>> {
    let mut response = Response::new(full(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn full(body: impl Into<Bytes>) -> BoxBody<Bytes, BatchError> {
    Full::new(body.into()).map_err(|e| match e {}).boxed()
}
