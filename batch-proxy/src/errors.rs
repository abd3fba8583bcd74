use thiserror::Error;

/// Batch-wide failures. Anything that can be pinned to a single query is
/// turned into an error-shaped `QueryResponse` instead.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("invalid batch: {0}")]
    Validation(#[from] ValidationError),

    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Response serialization error: {0}")]
    ResponseSerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejection of a malformed batch. Nothing is dispatched when this is raised.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("expected an array of queries")]
    NotAnArray,

    #[error("query {index}: {reason}")]
    InvalidQuery { index: usize, reason: String },

    #[error("query {index}: missing or empty `{field}`")]
    MissingField { index: usize, field: &'static str },
}

/// Failure of a single outbound call. Never escapes the dispatcher.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("upstream timeout")]
    Timeout,

    #[error("upstream request failed: {0}")]
    RequestFailed(String),

    #[error("could not read upload {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not build request: {0}")]
    Build(String),
}
