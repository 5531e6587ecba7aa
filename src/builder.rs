//! The deferred request builder every endpoint binding hands out.
//!
//! A binding is pure construction: method, path, routing triple, result
//! type. All per-request behavior lives here, behind one uniform contract:
//! accumulate body fields, query parameters and preconditions, then
//! [`RequestBuilder::execute`] runs the precondition checks, dispatches and
//! decodes the response. A builder is consumed by execute and cannot be
//! reused; ownership enforces the one-way configuring, executing, done
//! progression.

use std::fmt;
use std::marker::PhantomData;

use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::client::Client;
use crate::request::{Body, RequestDescriptor, Route, CONTENT_TYPE_JSON};
use crate::types::{ErrorKind, Result};

/// A deferred request, generic over the decoded result type.
///
/// `T` may be a single object, a sequence, or `()` for endpoints without a
/// payload; an empty response body decodes as JSON `null`.
#[must_use = "a request builder does nothing until execute is called"]
pub struct RequestBuilder<'a, T> {
    client: &'a Client,
    method: Method,
    endpoint: String,
    route: Route,
    content_type: String,
    fields: Map<String, Value>,
    raw: Option<Vec<u8>>,
    url_params: Vec<(String, String)>,
    preconditions: Vec<(bool, String)>,
    ignore_cache: bool,
    cancel_on_rate_limit: bool,
    _result: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for RequestBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("endpoint", &self.endpoint)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

impl<'a, T: DeserializeOwned> RequestBuilder<'a, T> {
    /// A builder for the given endpoint, defaulting to a JSON content type
    /// and no body.
    pub fn new(client: &'a Client, method: Method, endpoint: String, route: Route) -> Self {
        Self {
            client,
            method,
            endpoint,
            route,
            content_type: CONTENT_TYPE_JSON.to_owned(),
            fields: Map::new(),
            raw: None,
            url_params: Vec::new(),
            preconditions: Vec::new(),
            ignore_cache: false,
            cancel_on_rate_limit: false,
            _result: PhantomData,
        }
    }

    /// Bypass the external response cache for this request.
    pub fn ignore_cache(mut self) -> Self {
        self.ignore_cache = true;
        self
    }

    /// Fail fast with [`ErrorKind::RateLimited`] instead of sleeping out a
    /// rate-limit window longer than 200 ms.
    pub fn cancel_on_rate_limit(mut self) -> Self {
        self.cancel_on_rate_limit = true;
        self
    }

    /// Add or replace a URL query parameter.
    pub fn url_param(mut self, name: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        if let Some(entry) = self.url_params.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.url_params.push((name.to_owned(), value));
        }
        self
    }

    /// Add or replace a JSON body field.
    ///
    /// A value that cannot be encoded is recorded as a failed precondition
    /// and surfaces at execute time.
    pub fn set(mut self, name: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.fields.insert(name.to_owned(), value);
            }
            Err(err) => {
                self.preconditions
                    .push((true, format!("cannot encode body field `{name}`: {err}")));
            }
        }
        self
    }

    /// Record a precondition; the first failed one short-circuits execute
    /// with [`ErrorKind::Validation`] before any I/O.
    pub fn precondition(mut self, failed: bool, message: impl Into<String>) -> Self {
        self.preconditions.push((failed, message.into()));
        self
    }

    /// Replace the body with a pre-encoded byte stream, for shapes the
    /// builder does not assemble itself such as multipart uploads.
    pub fn body_bytes(mut self, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.content_type = content_type.into();
        self.raw = Some(bytes);
        self
    }

    /// Run the precondition checks, dispatch the request and decode the
    /// response body into `T`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Validation`] for a failed precondition, otherwise any
    /// dispatch error; see [`ErrorKind`].
    pub async fn execute(self) -> Result<T> {
        let Self {
            client,
            method,
            mut endpoint,
            route,
            content_type,
            fields,
            raw,
            url_params,
            preconditions,
            ignore_cache,
            cancel_on_rate_limit,
            _result,
        } = self;

        for (failed, message) in &preconditions {
            if *failed {
                return Err(ErrorKind::Validation(message.clone()));
            }
        }

        if !url_params.is_empty() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (name, value) in &url_params {
                query.append_pair(name, value);
            }
            endpoint.push('?');
            endpoint.push_str(&query.finish());
        }

        let body = match raw {
            Some(bytes) => Body::Bytes(bytes),
            None if fields.is_empty() => Body::Empty,
            None => Body::Json(Value::Object(fields)),
        };

        let response = client
            .execute(RequestDescriptor {
                method,
                endpoint,
                route,
                body,
                content_type,
                rate_limit_adjuster: None,
                ignore_cache,
                cancel_on_rate_limit,
            })
            .await?;

        decode(&response.body)
    }
}

#[cfg(test)]
impl<T> RequestBuilder<'_, T> {
    pub(crate) fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub(crate) fn route(&self) -> &Route {
        &self.route
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let body = if body.is_empty() { b"null".as_slice() } else { body };
    serde_json::from_slice(body).map_err(ErrorKind::Decode)
}
