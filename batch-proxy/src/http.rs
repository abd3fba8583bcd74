use crate::cookies::CapturedCookie;
use crate::dispatcher::Transport;
use crate::errors::{BatchError, TransportError};
use crate::request_spec::{MultipartField, OutboundRequestSpec, RequestBody};
use crate::response::{RawResponse, status_message};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use url::Url;

/// Sends outbound requests to the API over a pooled `reqwest` client.
///
/// Timeouts are enforced by the dispatcher around `send`, which covers the
/// whole request/response cycle including collecting the body.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, BatchError> {
        // Redirects reach the parser as-is, Set-Cookie included
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, spec: OutboundRequestSpec) -> Result<RawResponse, TransportError> {
        let OutboundRequestSpec {
            url,
            method,
            headers,
            body,
            uses_cookie_jar,
        } = spec;

        let mut request = self
            .client
            .request(method.into(), url.clone())
            .headers(headers);

        match body {
            Some(RequestBody::Form(form)) => request = request.body(form),
            Some(RequestBody::Multipart(fields)) => {
                request = request.multipart(multipart_form(fields).await?)
            }
            None => {}
        }

        let response = request.send().await.map_err(request_error)?;

        let status = response.status();
        let cookies = uses_cookie_jar.then(|| capture_cookies(&response, &url));
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(request_error)?;

        Ok(RawResponse {
            status,
            status_message: status_message(status),
            headers,
            body,
            cookies,
        })
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::RequestFailed(e.to_string())
    }
}

/// Cookies set by this one response, limited to those valid for the target.
fn capture_cookies(response: &reqwest::Response, url: &Url) -> Vec<CapturedCookie> {
    response
        .cookies()
        .map(|cookie| CapturedCookie {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().map(str::to_string),
            path: cookie.path().map(str::to_string),
            http_only: cookie.http_only(),
            max_age: cookie.max_age(),
            expires: cookie.expires(),
        })
        .filter(|cookie| cookie.applies_to(url))
        .collect()
}

async fn multipart_form(fields: Vec<MultipartField>) -> Result<Form, TransportError> {
    let mut form = Form::new();

    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name, value),
            MultipartField::File { name, upload } => {
                let data = tokio::fs::read(&upload.path)
                    .await
                    .map_err(|source| TransportError::Upload {
                        path: upload.path.display().to_string(),
                        source,
                    })?;
                let part = Part::bytes(data)
                    .file_name(upload.filename)
                    .mime_str(&upload.content_type)
                    .map_err(|e| TransportError::Build(e.to_string()))?;
                form.part(name, part)
            }
        };
    }

    Ok(form)
}
