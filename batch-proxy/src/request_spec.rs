//! Translation of one query into one outbound HTTP request description.

use crate::context::{RequestContext, Upload};
use crate::errors::TransportError;
use crate::headers;
use crate::query::{Method, Query};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use url::Url;
use url::form_urlencoded;

#[derive(Clone, Debug, PartialEq)]
pub enum MultipartField {
    Text { name: String, value: String },
    File { name: String, upload: Upload },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` payload
    Form(String),
    Multipart(Vec<MultipartField>),
}

/// A fully resolved outbound call. Holds no connection state, so it can be
/// logged or rebuilt at will.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundRequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// Capture the Set-Cookie values of this call for the caller
    pub uses_cookie_jar: bool,
}

impl OutboundRequestSpec {
    pub fn build(query: &Query, context: &RequestContext) -> Result<Self, TransportError> {
        let mut url = resolve_url(&context.base_url, &query.endpoint)?;
        let method = query.method_override().unwrap_or_default();

        let mut headers = context.shared_headers();
        add_query_headers(&mut headers, query)?;

        let body = if method.has_body() {
            if context.is_multipart {
                Some(RequestBody::Multipart(multipart_fields(query, &context.uploads)))
            } else {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                Some(RequestBody::Form(form_body(query)))
            }
        } else {
            if !query.params.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (name, value) in &query.params {
                    pairs.append_pair(name, &value.to_param_string());
                }
            }
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            None
        };

        Ok(Self {
            url,
            method,
            headers,
            body,
            uses_cookie_jar: query.endpoint.trim_matches('/') == context.session_endpoint,
        })
    }
}

fn resolve_url(base: &Url, endpoint: &str) -> Result<Url, TransportError> {
    let base = base.as_str().trim_end_matches('/');
    let endpoint = endpoint.trim().trim_start_matches('/');

    Url::parse(&format!("{base}/{endpoint}"))
        .map_err(|e| TransportError::Build(format!("invalid endpoint {endpoint:?}: {e}")))
}

fn add_query_headers(headers: &mut HeaderMap, query: &Query) -> Result<(), TransportError> {
    if let Some(flags) = query.flags.as_ref().filter(|flags| !flags.is_empty()) {
        insert_header(headers, &headers::REQUEST_FLAGS, &flags.join(","))?;
    }

    let Some(meta) = &query.meta else {
        return Ok(());
    };

    if let Some(variants) = &meta.variants {
        let tokens: Vec<String> = variants
            .iter()
            .flat_map(|(experiment, contexts)| {
                contexts
                    .values()
                    .iter()
                    .map(move |context| format!("{experiment}={context}"))
            })
            .collect();
        if !tokens.is_empty() {
            insert_header(headers, &headers::REQUEST_VARIANTS, &tokens.join(" "))?;
        }
    }

    if let Some(names) = meta
        .meta_request_headers
        .as_ref()
        .filter(|names| !names.is_empty())
    {
        insert_header(headers, &headers::META_REQUEST_HEADERS, &names.join(","))?;
    }

    if meta.no_cache {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }

    Ok(())
}

fn insert_header(
    headers: &mut HeaderMap,
    name: &HeaderName,
    value: &str,
) -> Result<(), TransportError> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::Build(format!("invalid {name} header: {e}")))?;
    headers.insert(name.clone(), value);
    Ok(())
}

fn form_body(query: &Query) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in &query.params {
        serializer.append_pair(name, &value.to_param_string());
    }
    serializer.finish()
}

/// Params are passed through as text parts, except where an upload claims
/// the same field name; every upload becomes a file part.
fn multipart_fields(query: &Query, uploads: &[Upload]) -> Vec<MultipartField> {
    let mut fields: Vec<MultipartField> = query
        .params
        .iter()
        .filter(|(name, _)| !uploads.iter().any(|upload| &upload.field == *name))
        .map(|(name, value)| MultipartField::Text {
            name: name.clone(),
            value: value.to_param_string(),
        })
        .collect();

    fields.extend(uploads.iter().map(|upload| MultipartField::File {
        name: upload.field.clone(),
        upload: upload.clone(),
    }));

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InboundRequest;
    use crate::query::validate_queries;
    use crate::testutils::api_config;
    use serde_json::json;
    use std::path::PathBuf;

    fn context() -> RequestContext {
        RequestContext::build(
            &InboundRequest::default(),
            &api_config("http://api.example.com/v3/"),
        )
        .unwrap()
    }

    fn query(value: serde_json::Value) -> Query {
        validate_queries(&json!([value])).unwrap().remove(0)
    }

    #[test]
    fn test_get_encodes_params_in_query_string() {
        let query = query(json!({
            "endpoint": "/find/groups",
            "ref": "groups",
            "params": {"text": "rust & go", "fields": ["photo", "topics"], "page": 2}
        }));

        let spec = OutboundRequestSpec::build(&query, &context()).unwrap();

        assert_eq!(spec.method, Method::Get);
        assert_eq!(
            spec.url.as_str(),
            "http://api.example.com/v3/find/groups?text=rust+%26+go&fields=photo%2Ctopics&page=2"
        );
        assert_eq!(spec.headers[CONTENT_TYPE], "application/json");
        assert!(spec.body.is_none());
        assert!(!spec.uses_cookie_jar);
    }

    #[test]
    fn test_delete_uses_query_string() {
        let query = query(json!({
            "endpoint": "members/self/rsvps",
            "ref": "rsvp",
            "params": {"event_id": 9},
            "meta": {"method": "DELETE"}
        }));

        let spec = OutboundRequestSpec::build(&query, &context()).unwrap();
        assert_eq!(spec.method, Method::Delete);
        assert_eq!(spec.url.query(), Some("event_id=9"));
        assert!(spec.body.is_none());
    }

    #[test]
    fn test_post_encodes_form_body() {
        let query = query(json!({
            "endpoint": "members/self/rsvps",
            "ref": "rsvp",
            "params": {"response": "yes", "guests": 1},
            "meta": {"method": "POST"}
        }));

        let spec = OutboundRequestSpec::build(&query, &context()).unwrap();

        assert_eq!(spec.method, Method::Post);
        assert_eq!(spec.url.query(), None);
        assert_eq!(
            spec.headers[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            spec.body,
            Some(RequestBody::Form("response=yes&guests=1".to_string()))
        );
    }

    #[test]
    fn test_request_headers() {
        let query = query(json!({
            "endpoint": "self",
            "ref": "self",
            "flags": ["a", "b"],
            "meta": {
                "noCache": true,
                "variants": {"exp": ["1", "2"], "solo": 3},
                "metaRequestHeaders": ["unread-messages", "unread-notifications"]
            }
        }));

        let spec = OutboundRequestSpec::build(&query, &context()).unwrap();

        assert_eq!(spec.headers["x-meetup-request-flags"], "a,b");
        assert_eq!(spec.headers["x-meetup-variants"], "exp=1 exp=2 solo=3");
        assert_eq!(
            spec.headers["x-meta-request-headers"],
            "unread-messages,unread-notifications"
        );
        assert_eq!(spec.headers[CACHE_CONTROL], "no-cache");
    }

    #[test]
    fn test_invalid_header_value_fails_query() {
        let query = query(json!({"endpoint": "self", "ref": "self", "flags": ["bad\nflag"]}));
        assert!(matches!(
            OutboundRequestSpec::build(&query, &context()).unwrap_err(),
            TransportError::Build(_)
        ));
    }

    #[test]
    fn test_session_endpoint_gets_cookie_jar() {
        let spec = OutboundRequestSpec::build(
            &query(json!({"endpoint": "/sessions", "ref": "login", "meta": {"method": "POST"}})),
            &context(),
        )
        .unwrap();
        assert!(spec.uses_cookie_jar);

        let spec = OutboundRequestSpec::build(
            &query(json!({"endpoint": "sessions/other", "ref": "x"})),
            &context(),
        )
        .unwrap();
        assert!(!spec.uses_cookie_jar);
    }

    #[test]
    fn test_multipart_body() {
        let upload = Upload {
            field: "photo".to_string(),
            filename: "me.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            path: PathBuf::from("/tmp/upload-1"),
        };
        let mut inbound = InboundRequest::default();
        inbound.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=x"),
        );
        inbound.uploads.push(upload.clone());
        let context = RequestContext::build(&inbound, &api_config("http://api.example.com")).unwrap();

        let query = query(json!({
            "endpoint": "members/self/photos",
            "ref": "upload",
            "params": {"caption": "hi", "photo": "placeholder"},
            "meta": {"method": "POST"}
        }));
        let spec = OutboundRequestSpec::build(&query, &context).unwrap();

        assert!(!spec.headers.contains_key(CONTENT_TYPE));
        assert_eq!(
            spec.body,
            Some(RequestBody::Multipart(vec![
                MultipartField::Text {
                    name: "caption".to_string(),
                    value: "hi".to_string()
                },
                MultipartField::File {
                    name: "photo".to_string(),
                    upload
                },
            ]))
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let query = query(json!({
            "endpoint": "self",
            "ref": "self",
            "params": {"fields": ["a", "b"]},
            "flags": ["x"]
        }));
        let context = context();

        assert_eq!(
            OutboundRequestSpec::build(&query, &context).unwrap(),
            OutboundRequestSpec::build(&query, &context).unwrap()
        );
    }
}
