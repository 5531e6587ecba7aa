//! Request descriptors handed to the dispatcher.

use std::time::Duration;

use http::Method;

use crate::ratelimit::{LocalKey, ResourceClass};
use crate::types::Snowflake;

/// Content type for JSON request bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Content type prefix for multipart file uploads; the full value carries
/// the boundary parameter.
pub const CONTENT_TYPE_FORM_DATA: &str = "multipart/form-data";

/// Middleware hook for adjusting rate-limit delays before sleeping them out.
pub type RateLimitAdjuster = fn(Duration) -> Duration;

/// The client's best guess at which bucket a request belongs to, used until
/// the server discloses the authoritative bucket key.
#[derive(Debug, Clone)]
pub struct Route {
    /// Resource class the endpoint belongs to.
    pub class: ResourceClass,
    /// Major parameter partitioning buckets within the class; unset for
    /// [`ResourceClass::Others`].
    pub major_id: Snowflake,
    /// Endpoint-family label chosen by the binding.
    pub local_key: LocalKey,
}

impl Route {
    /// A routing triple for the given class, major parameter and label.
    pub fn new(
        class: ResourceClass,
        major_id: Snowflake,
        local_key: impl Into<LocalKey>,
    ) -> Self {
        Self {
            class,
            major_id,
            local_key: local_key.into(),
        }
    }
}

/// The request body in one of the supported shapes.
#[derive(Debug, Clone)]
pub enum Body {
    /// No body.
    Empty,
    /// A structured body, JSON-encoded at dispatch time. Must be paired
    /// with [`CONTENT_TYPE_JSON`].
    Json(serde_json::Value),
    /// A pre-encoded byte stream, passed through untouched. This is the
    /// shape multipart uploads arrive in.
    Bytes(Vec<u8>),
}

impl Body {
    /// Whether the request carries no body.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Everything the dispatcher needs to issue one request.
///
/// Immutable once handed over: the dispatcher takes it by value.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Endpoint path, appended to the versioned base URL.
    pub endpoint: String,
    /// The routing triple gating dispatch.
    pub route: Route,
    /// Request body.
    pub body: Body,
    /// Content type sent with the request.
    pub content_type: String,
    /// Optional middleware adjusting rate-limit delays. Currently recorded
    /// but not consulted by the dispatcher.
    pub rate_limit_adjuster: Option<RateLimitAdjuster>,
    /// Skip the external response cache for this request.
    pub ignore_cache: bool,
    /// Fail fast instead of sleeping out a long rate-limit window.
    pub cancel_on_rate_limit: bool,
}
