//! Query model and batch validation.
//!
//! A batch is a JSON array of queries. Every element has to match the query
//! schema; the first element that doesn't rejects the whole batch before any
//! outbound call is made.

use crate::errors::ValidationError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single parameter or variant-context value.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl ParamValue {
    pub fn values(&self) -> &[Scalar] {
        match self {
            ParamValue::One(scalar) => std::slice::from_ref(scalar),
            ParamValue::Many(scalars) => scalars,
        }
    }

    /// Lists are sent comma-joined, the way the API expects `fields=a,b`.
    pub fn to_param_string(&self) -> String {
        self.values()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "delete")]
    Delete,
}

impl Method {
    /// GET and DELETE carry params in the query string, the rest in the body.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Patch | Method::Put)
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => http::Method::GET,
            Method::Post => http::Method::POST,
            Method::Patch => http::Method::PATCH,
            Method::Put => http::Method::PUT,
            Method::Delete => http::Method::DELETE,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(default)]
    pub no_cache: bool,
    /// experiment name -> one or more contexts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<IndexMap<String, ParamValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_request_headers: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Query {
    pub endpoint: String,
    #[serde(rename = "ref")]
    pub r#ref: String,
    #[serde(rename = "type", default)]
    pub r#type: String,
    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<QueryMeta>,
    /// Short-circuits the network call with this body (local/dev use)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response: Option<Value>,
}

impl Query {
    fn from_value(index: usize, value: &Value) -> Result<Self, ValidationError> {
        let query = Query::deserialize(value).map_err(|e| ValidationError::InvalidQuery {
            index,
            reason: e.to_string(),
        })?;

        if query.endpoint.trim().is_empty() {
            return Err(ValidationError::MissingField {
                index,
                field: "endpoint",
            });
        }
        if query.r#ref.is_empty() {
            return Err(ValidationError::MissingField {
                index,
                field: "ref",
            });
        }

        Ok(query)
    }

    pub fn method_override(&self) -> Option<Method> {
        self.meta.as_ref().and_then(|meta| meta.method)
    }
}

/// Validates a decoded batch, failing on the first malformed query.
pub fn validate_queries(raw: &Value) -> Result<Vec<Query>, ValidationError> {
    let items = raw.as_array().ok_or(ValidationError::NotAnArray)?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| Query::from_value(index, item))
        .collect()
}
