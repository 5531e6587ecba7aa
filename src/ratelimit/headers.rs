//! Reconciliation of the server's rate-limit timing headers.
//!
//! The API reports timings in three mutually incompatible shapes: an
//! absolute reset as fractional epoch seconds, a relative reset-after as
//! fractional seconds, and (on 429 responses) a JSON body plus a generic
//! `Retry-After` header, both already in milliseconds because every request
//! announces `X-RateLimit-Precision: millisecond`. [`normalize`] rewrites
//! all of them into one canonical set with every timing field in integer
//! milliseconds, absolute fields epoch-based, so the bucket update path
//! never has to branch on units again.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::header::RETRY_AFTER;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;

use crate::types::{ErrorKind, Result};

/// Requested timing precision, sent with every request.
pub const X_RATELIMIT_PRECISION: &str = "x-ratelimit-precision";
/// The authoritative bucket key disclosed by the server.
pub const X_RATELIMIT_BUCKET: &str = "x-ratelimit-bucket";
/// Total permitted requests in the current window.
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Permits left in the current window.
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Absolute moment the window expires; epoch milliseconds after
/// normalization.
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
/// Time until the window expires; milliseconds after normalization.
pub const X_RATELIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Set to `true` when the whole token is limited rather than one route.
pub const X_RATELIMIT_GLOBAL: &str = "x-ratelimit-global";

/// Body of a `429 Too Many Requests` response.
#[derive(Debug, Deserialize)]
struct TooManyRequestsPayload {
    #[serde(default)]
    retry_after: i64,
    #[serde(default)]
    global: bool,
}

/// Extract the server's wall clock from the RFC 1123 `date` header.
///
/// Useful for detecting clock drift between the server and this process.
pub(crate) fn server_date(headers: &HeaderMap) -> Result<SystemTime> {
    let date = header_str(headers, "date").ok_or(ErrorKind::InvalidRateLimitHeader {
        name: "date",
        value: String::new(),
    })?;
    httpdate::parse_http_date(date).map_err(|_| ErrorKind::InvalidRateLimitHeader {
        name: "date",
        value: date.to_owned(),
    })
}

/// Rewrite the response headers into the canonical rate-limit form.
///
/// On 429 responses the JSON body overrides the header fields. A missing or
/// malformed `date` header is tolerated: the local clock substitutes, which
/// merely costs a little drift. Unparsable numeric fields are an error.
pub(crate) fn normalize(
    status: StatusCode,
    mut headers: HeaderMap,
    body: &[u8],
) -> Result<HeaderMap> {
    let date = match server_date(&headers) {
        Ok(date) => date,
        Err(err) => {
            log::warn!("cannot read the server clock, using the local one: {err}");
            SystemTime::now()
        }
    };

    if let Some(value) = header_str(&headers, X_RATELIMIT_RESET_AFTER).map(ToOwned::to_owned) {
        let seconds = parse_f64(X_RATELIMIT_RESET_AFTER, &value)?;
        set_i64(&mut headers, X_RATELIMIT_RESET_AFTER, millis(seconds));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let payload: TooManyRequestsPayload =
            serde_json::from_slice(body).map_err(ErrorKind::Decode)?;
        if payload.global {
            headers.insert(X_RATELIMIT_GLOBAL, HeaderValue::from_static("true"));
        }
        if payload.retry_after > 0 {
            set_i64(&mut headers, X_RATELIMIT_RESET_AFTER, payload.retry_after);
        }
    }

    if let Some(value) = headers.get(RETRY_AFTER).cloned() {
        headers.insert(X_RATELIMIT_RESET_AFTER, value);
    }

    if let Some(value) = header_str(&headers, X_RATELIMIT_RESET).map(ToOwned::to_owned) {
        let seconds = parse_f64(X_RATELIMIT_RESET, &value)?;
        set_i64(&mut headers, X_RATELIMIT_RESET, millis(seconds));
    }

    if headers.get(X_RATELIMIT_RESET).is_none() {
        if let Some(after) = header_i64(&headers, X_RATELIMIT_RESET_AFTER) {
            set_i64(&mut headers, X_RATELIMIT_RESET, epoch_millis(date) + after);
        }
    }

    Ok(headers)
}

/// Milliseconds since the epoch, negative for pre-epoch moments.
pub(crate) fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_millis()).unwrap_or(i64::MAX),
        Err(err) => -i64::try_from(err.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Inverse of [`epoch_millis`].
pub(crate) fn from_epoch_millis(ms: i64) -> SystemTime {
    let magnitude = Duration::from_millis(ms.unsigned_abs());
    if ms >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// A header value as UTF-8, when present and readable.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// A header value parsed as a decimal integer, when present and parsable.
pub(crate) fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    header_str(headers, name)?.parse().ok()
}

fn set_i64(headers: &mut HeaderMap, name: &'static str, value: i64) {
    headers.insert(name, HeaderValue::from(value));
}

fn parse_f64(name: &'static str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| ErrorKind::InvalidRateLimitHeader {
            name,
            value: value.to_owned(),
        })
}

#[allow(clippy::cast_possible_truncation)]
fn millis(seconds: f64) -> i64 {
    (seconds * 1000.0) as i64
}
