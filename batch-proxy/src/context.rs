//! Per-batch request context.
//!
//! Built once from the inbound request before any query is looked at, then
//! shared read-only by every outbound request of the batch.

use crate::config::{ApiConfig, AuthConfig};
use crate::errors::BatchError;
use crate::headers;
use http::header::{
    ACCEPT_ENCODING, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    HeaderMap, HeaderValue, HOST,
};
use http::Version;
use serde_json::Value;
use shared::http::filter_hop_by_hop;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Headers re-derived for every outbound call rather than forwarded.
static STRIPPED_HEADERS: &[http::header::HeaderName] =
    &[HOST, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, AUTHORIZATION, COOKIE];

/// The caller identity as resolved by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    Bearer(String),
    Session { cookie: String, csrf: String },
}

impl Identity {
    /// Resolves the identity from inbound headers: a bearer token wins,
    /// otherwise the session cookie paired with its CSRF header.
    pub fn from_headers(headers: &HeaderMap, auth: &AuthConfig) -> Self {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());

        if let Some(token) = bearer {
            return Identity::Bearer(token.to_string());
        }

        let cookie = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| {
                v.split(';')
                    .any(|pair| pair.trim().starts_with(&format!("{}=", auth.session_cookie)))
            });
        let csrf = headers
            .get(auth.csrf_header.as_str())
            .and_then(|v| v.to_str().ok());

        match (cookie, csrf) {
            (Some(cookie), Some(csrf)) => Identity::Session {
                cookie: cookie.to_string(),
                csrf: csrf.to_string(),
            },
            _ => Identity::Anonymous,
        }
    }
}

/// A file from a multipart upload, already spooled to disk by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub path: PathBuf,
}

/// Everything the proxy needs from the incoming request.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub headers: HeaderMap,
    pub version: Version,
    pub identity: Identity,
    /// Negotiated client language, e.g. `en-US`
    pub language: Option<String>,
    /// Client IP given explicitly through the override parameter
    pub client_ip_override: Option<String>,
    pub uploads: Vec<Upload>,
    /// Navigation origin / click-tracking state passed through to the tracking sink
    pub metadata: Option<Value>,
}

impl Default for InboundRequest {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            identity: Identity::Anonymous,
            language: None,
            client_ip_override: None,
            uploads: Vec::new(),
            metadata: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub base_url: Url,
    pub forwarded_headers: HeaderMap,
    pub auth_headers: HeaderMap,
    pub language_header: Option<HeaderValue>,
    pub client_ip_header: Option<HeaderValue>,
    pub timeout: Duration,
    pub is_multipart: bool,
    pub uploads: Vec<Upload>,
    pub session_endpoint: String,
}

impl RequestContext {
    pub fn build(inbound: &InboundRequest, api: &ApiConfig) -> Result<Self, BatchError> {
        let base_url = api
            .base_url
            .clone()
            .ok_or(BatchError::MissingConfig("api.base_url"))?;

        let is_multipart = inbound
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("multipart/form-data"));

        let mut forwarded_headers = inbound.headers.clone();
        filter_hop_by_hop(&mut forwarded_headers, inbound.version);
        for name in STRIPPED_HEADERS {
            forwarded_headers.remove(name);
        }

        Ok(Self {
            base_url,
            forwarded_headers,
            auth_headers: auth_headers(&inbound.identity),
            language_header: inbound
                .language
                .as_deref()
                .and_then(|lang| HeaderValue::from_str(lang).ok()),
            client_ip_header: client_ip(inbound, api)
                .and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()),
            timeout: Duration::from_millis(api.timeout_ms),
            is_multipart,
            uploads: if is_multipart {
                inbound.uploads.clone()
            } else {
                Vec::new()
            },
            session_endpoint: api.session_endpoint.trim_matches('/').to_string(),
        })
    }

    /// The headers every outbound request of the batch starts from.
    pub fn shared_headers(&self) -> HeaderMap {
        let mut headers = self.forwarded_headers.clone();
        for (name, value) in &self.auth_headers {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(language) = &self.language_header {
            headers.insert(ACCEPT_LANGUAGE, language.clone());
        }
        if let Some(ip) = &self.client_ip_header {
            headers.insert(headers::CLIENT_IP.clone(), ip.clone());
        }
        headers
    }
}

fn auth_headers(identity: &Identity) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match identity {
        Identity::Anonymous => {}
        Identity::Bearer(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("Dropping bearer token that is not a valid header value"),
        },
        Identity::Session { cookie, csrf } => {
            match (HeaderValue::from_str(cookie), HeaderValue::from_str(csrf)) {
                (Ok(cookie), Ok(csrf)) => {
                    headers.insert(COOKIE, cookie);
                    headers.insert(headers::CSRF_TOKEN.clone(), csrf);
                }
                _ => tracing::warn!("Dropping session credentials that are not valid header values"),
            }
        }
    }

    headers
}

/// The explicit override wins over the trusted forwarded header. Anything
/// that doesn't parse as an IP address is ignored.
fn client_ip(inbound: &InboundRequest, api: &ApiConfig) -> Option<IpAddr> {
    if let Some(ip) = inbound
        .client_ip_override
        .as_deref()
        .and_then(|v| v.trim().parse().ok())
    {
        return Some(ip);
    }

    let header = api.trusted_ip_header.as_deref()?;
    inbound
        .headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first_hop| first_hop.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_api_config() -> ApiConfig {
        let mut api = crate::testutils::api_config("http://api.example.com/");
        api.timeout_ms = 1500;
        api.session_endpoint = "/sessions/".to_string();
        api
    }

    fn inbound_with(headers: &[(&str, &str)]) -> InboundRequest {
        let mut inbound = InboundRequest::default();
        for (name, value) in headers {
            inbound.headers.append(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        inbound
    }

    #[test]
    fn test_strips_transport_headers() {
        let inbound = inbound_with(&[
            ("host", "www.example.com"),
            ("accept-encoding", "gzip"),
            ("content-length", "42"),
            ("content-type", "application/json"),
            ("connection", "keep-alive"),
            ("user-agent", "test-agent"),
            ("x-custom", "kept"),
        ]);

        let context = RequestContext::build(&inbound, &test_api_config()).unwrap();
        let headers = &context.forwarded_headers;

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["user-agent"], "test-agent");
        assert_eq!(headers["x-custom"], "kept");
        assert!(!context.is_multipart);
        assert_eq!(context.timeout, Duration::from_millis(1500));
        assert_eq!(context.session_endpoint, "sessions");
    }

    #[test]
    fn test_missing_base_url_is_fatal() {
        let mut api = test_api_config();
        api.base_url = None;

        assert!(matches!(
            RequestContext::build(&InboundRequest::default(), &api).unwrap_err(),
            BatchError::MissingConfig("api.base_url")
        ));
    }

    #[test]
    fn test_bearer_identity() {
        let mut inbound = inbound_with(&[("authorization", "Bearer stale")]);
        inbound.identity = Identity::Bearer("abc123".to_string());

        let headers = RequestContext::build(&inbound, &test_api_config())
            .unwrap()
            .shared_headers();

        assert_eq!(headers[AUTHORIZATION], "Bearer abc123");
        assert!(!headers.contains_key(COOKIE));
    }

    #[test]
    fn test_session_identity() {
        let mut inbound = inbound_with(&[("cookie", "tracking=1")]);
        inbound.identity = Identity::Session {
            cookie: "MEETUP_MEMBER=id=1".to_string(),
            csrf: "tok".to_string(),
        };

        let headers = RequestContext::build(&inbound, &test_api_config())
            .unwrap()
            .shared_headers();

        assert_eq!(headers[COOKIE], "MEETUP_MEMBER=id=1");
        assert_eq!(headers["csrf-token"], "tok");
        assert!(!headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_identity_from_headers() {
        let auth = AuthConfig::default();

        let headers = inbound_with(&[("authorization", "Bearer xyz")]).headers;
        assert_eq!(
            Identity::from_headers(&headers, &auth),
            Identity::Bearer("xyz".to_string())
        );

        let headers = inbound_with(&[
            ("cookie", "a=1; MEETUP_MEMBER=id=7"),
            ("x-csrf-token", "csrf"),
        ])
        .headers;
        assert_eq!(
            Identity::from_headers(&headers, &auth),
            Identity::Session {
                cookie: "a=1; MEETUP_MEMBER=id=7".to_string(),
                csrf: "csrf".to_string()
            }
        );

        // a session cookie without its CSRF token is not an identity
        let headers = inbound_with(&[("cookie", "MEETUP_MEMBER=id=7")]).headers;
        assert_eq!(Identity::from_headers(&headers, &auth), Identity::Anonymous);
    }

    #[test]
    fn test_language_and_client_ip() {
        let mut inbound = inbound_with(&[("fastly-client-ip", "203.0.113.7, 10.0.0.1")]);
        inbound.language = Some("fr-FR".to_string());

        let headers = RequestContext::build(&inbound, &test_api_config())
            .unwrap()
            .shared_headers();
        assert_eq!(headers[ACCEPT_LANGUAGE], "fr-FR");
        assert_eq!(headers["x-meetup-client-ip"], "203.0.113.7");

        inbound.client_ip_override = Some("198.51.100.2".to_string());
        let headers = RequestContext::build(&inbound, &test_api_config())
            .unwrap()
            .shared_headers();
        assert_eq!(headers["x-meetup-client-ip"], "198.51.100.2");
    }

    #[test]
    fn test_client_ip_requires_trusted_source() {
        let inbound = inbound_with(&[("x-forwarded-for", "203.0.113.7")]);

        let headers = RequestContext::build(&inbound, &test_api_config())
            .unwrap()
            .shared_headers();
        assert!(!headers.contains_key("x-meetup-client-ip"));

        let mut inbound = inbound_with(&[("fastly-client-ip", "not-an-ip")]);
        inbound.client_ip_override = Some("also-not-an-ip".to_string());
        let context = RequestContext::build(&inbound, &test_api_config()).unwrap();
        assert!(context.client_ip_header.is_none());
    }

    #[test]
    fn test_multipart_detection() {
        let mut inbound =
            inbound_with(&[("content-type", "multipart/form-data; boundary=xyz")]);
        inbound.uploads.push(Upload {
            field: "photo".to_string(),
            filename: "me.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            path: PathBuf::from("/tmp/upload-1"),
        });

        let context = RequestContext::build(&inbound, &test_api_config()).unwrap();
        assert!(context.is_multipart);
        assert_eq!(context.uploads.len(), 1);
        assert!(!context.forwarded_headers.contains_key(CONTENT_TYPE));
    }
}
