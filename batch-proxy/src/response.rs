//! Classification of raw upstream responses into query responses.
//!
//! Rules, first match wins:
//! - `204` has no value and no error
//! - a status outside `[200, 400)` is an error named after the status, with
//!   whatever could be decoded from the body as the value
//! - a body that doesn't decode as JSON is an error
//! - a decoded body carrying a `problem` is an API-level error
//! - anything else is the decoded value
//!
//! `meta` is filled from the response headers in every case.

use crate::cookies::CapturedCookie;
use crate::headers;
use crate::query::Query;
use http::header::LINK;
use http::{HeaderMap, StatusCode};
use hyper::body::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// The outcome of one dispatched call, real or synthetic.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub status_message: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set-Cookie values captured for this call only
    pub cookies: Option<Vec<CapturedCookie>>,
}

impl RawResponse {
    pub fn synthetic(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_message: status_message(status),
            headers: HeaderMap::new(),
            body: body.into(),
            cookies: None,
        }
    }
}

pub fn status_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

/// experiment -> context -> variant (`None` when the API sent no variant)
pub type Variants = IndexMap<String, IndexMap<String, Option<String>>>;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<IndexMap<String, bool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<Variants>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    pub endpoint: String,
    pub status_code: u16,
    /// Remaining vendor headers, prefix stripped and camel-cased
    #[serde(flatten)]
    pub extra: IndexMap<String, String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct QueryResponse {
    #[serde(rename = "ref")]
    pub r#ref: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub meta: ResponseMeta,
}

impl QueryResponse {
    /// An error-shaped response that never reached the parser.
    pub fn failed(query: &Query, status: StatusCode, error: String) -> Self {
        Self {
            r#ref: query.r#ref.clone(),
            r#type: query.r#type.clone(),
            value: Value::Null,
            error: Some(error),
            meta: ResponseMeta {
                endpoint: query.endpoint.clone(),
                status_code: status.as_u16(),
                ..Default::default()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.value.is_null()
    }
}

pub fn parse_response(query: &Query, raw: &RawResponse) -> QueryResponse {
    let (value, error) = classify(raw);

    if let Some(error) = &error {
        tracing::debug!(
            query_ref = %query.r#ref,
            status = raw.status.as_u16(),
            error = %error,
            "Query resolved to an error"
        );
    }

    QueryResponse {
        r#ref: query.r#ref.clone(),
        r#type: query.r#type.clone(),
        value,
        error,
        meta: parse_meta(&query.endpoint, raw.status, &raw.headers),
    }
}

fn classify(raw: &RawResponse) -> (Value, Option<String>) {
    if raw.status == StatusCode::NO_CONTENT {
        return (Value::Null, None);
    }

    if !(200..400).contains(&raw.status.as_u16()) {
        return (best_effort_decode(&raw.body), Some(raw.status_message.clone()));
    }

    match decode_body(&raw.body) {
        Err(e) => (Value::Null, Some(e.to_string())),
        Ok(value) => match api_problem(&value) {
            Some(problem) => (value, Some(problem)),
            None => (value, None),
        },
    }
}

/// The API double-escapes newlines in some payloads; collapse `\\n` so the
/// decoded string holds a real newline.
fn decode_body(body: &[u8]) -> Result<Value, serde_json::Error> {
    let text = String::from_utf8_lossy(body);
    if text.contains("\\\\n") {
        serde_json::from_str(&text.replace("\\\\n", "\\n"))
    } else {
        serde_json::from_str(&text)
    }
}

fn best_effort_decode(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    decode_body(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn api_problem(value: &Value) -> Option<String> {
    let problem = value.as_object()?.get("problem")?;
    let details = value.get("details").unwrap_or(&Value::Null);
    Some(format!(
        "API problem: {}: {}",
        display_value(problem),
        display_value(details)
    ))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Serialized names of the typed `ResponseMeta` fields; flattened extras
/// must never repeat them.
const TYPED_META_KEYS: &[&str] = &[
    "flags",
    "variants",
    "link",
    "requestId",
    "totalCount",
    "endpoint",
    "statusCode",
];

pub fn parse_meta(endpoint: &str, status: StatusCode, headers: &HeaderMap) -> ResponseMeta {
    let header = |name: &str| {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    };

    let mut extra = IndexMap::new();
    for name in headers.keys() {
        let name = name.as_str();
        if matches!(
            name,
            headers::RESPONSE_FLAGS | headers::RESPONSE_VARIANTS | headers::REQUEST_ID
        ) {
            continue;
        }
        if let Some(rest) = name.strip_prefix(headers::VENDOR_PREFIX)
            && let Some(value) = header(name)
        {
            let key = camel_case(rest);
            if TYPED_META_KEYS.contains(&key.as_str()) {
                tracing::debug!(header = name, "Ignoring vendor header shadowing a meta field");
                continue;
            }
            extra.insert(key, value);
        }
    }

    ResponseMeta {
        flags: header(headers::RESPONSE_FLAGS).map(|v| parse_flags(&v)),
        variants: header(headers::RESPONSE_VARIANTS).map(|v| parse_variants(&v)),
        link: header(LINK.as_str()).map(|v| parse_link(&v)),
        request_id: header(headers::REQUEST_ID),
        total_count: header(headers::TOTAL_COUNT).and_then(|v| v.trim().parse().ok()),
        endpoint: endpoint.to_string(),
        status_code: status.as_u16(),
        extra,
    }
}

/// `foo=true, bar=false` -> `{foo: true, bar: false}`
pub fn parse_flags(value: &str) -> IndexMap<String, bool> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim() == "true"))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// `exp=123|a other=9|` -> `{exp: {123: "a"}, other: {9: null}}`
pub fn parse_variants(value: &str) -> Variants {
    let mut variants = Variants::new();

    for token in value.split_whitespace() {
        let Some((experiment, rest)) = token.split_once('=') else {
            continue;
        };
        let (context, variant) = match rest.split_once('|') {
            Some((context, variant)) => (context, variant),
            None => (rest, ""),
        };
        let variant = (!variant.is_empty()).then(|| variant.to_string());

        variants
            .entry(experiment.to_string())
            .or_default()
            .insert(context.to_string(), variant);
    }

    variants
}

/// `<url>; rel="next", <url2>; rel="prev last"` -> `{next: url, prev: url2, last: url2}`
pub fn parse_link(value: &str) -> IndexMap<String, String> {
    let mut links = IndexMap::new();
    let mut rest = value;

    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let url = &after[..end];
        let params = &after[end + 1..];
        let next = params.find('<').unwrap_or(params.len());

        let rels = params[..next]
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rel="))
            .flat_map(|rel| rel.trim_matches(|c| c == '"' || c == ',' || c == ' ').split_whitespace());
        for rel in rels {
            links.insert(rel.to_string(), url.to_string());
        }

        rest = &params[next..];
    }

    links
}

/// `unread-messages` -> `unreadMessages`
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, part) in name.split('-').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(part);
        } else {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}
