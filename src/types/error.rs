use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Kinds of errors surfaced by the client.
///
/// Note: the error messages can change over time, so don't match on the
/// rendered output.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The client configuration was rejected before any request was made.
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    /// A request precondition failed; raised at execute time, before any I/O.
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// The route is rate limited and the current window outlasts the
    /// caller's patience. No request was issued.
    #[error("Rate limited and unwilling to wait out the current window")]
    RateLimited,

    /// Network error while sending the request.
    /// This does not include erroneous status codes; those surface as
    /// [`ErrorKind::Rest`] or [`ErrorKind::TooManyRequests`].
    #[error("Network error")]
    NetworkRequest(#[source] reqwest::Error),

    /// Cannot read the body of the received response.
    #[error("Error reading response body")]
    ReadResponseBody(#[source] reqwest::Error),

    /// The network client required for making requests cannot be created.
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// A numeric rate-limit header field could not be parsed.
    #[error("Malformed rate limit header `{name}`: `{value}`")]
    InvalidRateLimitHeader {
        /// The header field that failed to parse.
        name: &'static str,
        /// The offending value.
        value: String,
    },

    /// The server answered `429 Too Many Requests`. The affected bucket has
    /// already been updated; the request is never retried automatically.
    #[error("Too many requests, retry possible in {retry_after:?} (global: {global})")]
    TooManyRequests {
        /// How long the server asked us to back off.
        retry_after: Duration,
        /// Whether the whole token is limited rather than one route.
        global: bool,
    },

    /// The server answered outside the successful range with a structured
    /// error payload.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// The response body could not be decoded into the requested type.
    #[error("Cannot decode response body")]
    Decode(#[source] serde_json::Error),
}

/// A structured error returned by the REST API for non-2xx responses.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RestError {
    /// HTTP status code of the response.
    pub http_status: StatusCode,
    /// Server-side error code, zero when the body carried none.
    pub code: i64,
    /// Human-readable message from the server, possibly empty.
    pub message: String,
    /// A hint for the human reading the error.
    pub suggestion: String,
}

/// The `{"code": int, "message": string}` shape of server error bodies.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl RestError {
    /// Build a typed error from a non-2xx response, decoding the server's
    /// error payload when one is present.
    pub(crate) fn from_response(http_status: StatusCode, body: &[u8]) -> Self {
        let mut error = Self {
            http_status,
            code: 0,
            message: String::new(),
            suggestion: format!(
                "response was outside the successful http code range [200, 300): {http_status}"
            ),
        };
        if !body.is_empty() {
            if let Ok(payload) = serde_json::from_slice::<ErrorPayload>(body) {
                error.code = payload.code;
                error.message = payload.message;
            }
        }
        error
    }
}
