//! Client configuration and the HTTP dispatcher.
//!
//! [`Config`] validates the connection parameters and builds a [`Client`].
//! The client owns the preconfigured reqwest client and one
//! [`RateLimitManager`]; [`Client::execute`] drives the full request cycle:
//! resolve the bucket, acquire a permit, sleep out the granted delay, send,
//! normalize the response headers, fold them back into the bucket and
//! classify the outcome. The dispatcher never retries; correctness hinges
//! on the preemptive gating, and the server charges duplicates against the
//! user.

use std::time::{Duration, SystemTime};

use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use typed_builder::TypedBuilder;

use crate::ratelimit::headers::{
    self, X_RATELIMIT_GLOBAL, X_RATELIMIT_PRECISION, X_RATELIMIT_RESET_AFTER,
};
use crate::ratelimit::RateLimitManager;
use crate::request::{Body, RequestDescriptor, CONTENT_TYPE_JSON};
use crate::types::{ErrorKind, RestError, Result};

/// Base URL of the REST API, without the version suffix.
pub const BASE_URL: &str = "https://discordapp.com/api";

/// Default timeout applied when [`Config`] does not carry one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// API versions this crate knows how to talk to.
const SUPPORTED_API_VERSIONS: &[u8] = &[6];

/// Patience budget applied when a request opts into failing fast on rate
/// limits.
const RATE_LIMIT_PATIENCE: Duration = Duration::from_millis(200);

/// Connection parameters, validated by [`Config::client`].
///
/// The user agent is mandated by the API terms and assembled as
/// `DiscordBot (<source-url>, <version>) <extra>`.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
pub struct Config {
    /// REST API version to talk to. Must be on the supported allowlist.
    pub api_version: u8,

    /// The bot token, sent as `Authorization: Bot <token>`.
    pub bot_token: String,

    /// Response timeout per request; defaults to [`DEFAULT_TIMEOUT`].
    pub timeout: Option<Duration>,

    /// When set, requests should fail fast instead of sleeping out long
    /// rate-limit windows. The dispatcher does not consult this field yet;
    /// [`crate::RequestBuilder::cancel_on_rate_limit`] is the working
    /// per-request opt-in.
    pub cancel_request_when_rate_limited: bool,

    /// Version number advertised in the user agent.
    pub user_agent_version: String,

    /// Source URL advertised in the user agent.
    pub user_agent_source_url: String,

    /// Free-form suffix appended to the user agent.
    pub user_agent_extra: String,

    /// Override for the API host, mainly for tests against a local mock
    /// server. Defaults to [`BASE_URL`].
    pub api_host: Option<String>,
}

impl Config {
    /// Instantiate a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] when the API version is not
    /// supported, the bot token is empty, or the mandatory user-agent
    /// fields are missing; [`ErrorKind::BuildRequestClient`] when the
    /// underlying HTTP client cannot be constructed.
    pub fn client(self) -> Result<Client> {
        if !SUPPORTED_API_VERSIONS.contains(&self.api_version) {
            return Err(ErrorKind::InvalidConfig(format!(
                "API version {} is not supported",
                self.api_version
            )));
        }
        if self.bot_token.is_empty() {
            return Err(ErrorKind::InvalidConfig("no bot token was provided".into()));
        }
        if self.user_agent_source_url.is_empty() || self.user_agent_version.is_empty() {
            return Err(ErrorKind::InvalidConfig(
                "both a source url and a version are required for the user agent".into(),
            ));
        }

        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bot {}", self.bot_token)).map_err(|_| {
                ErrorKind::InvalidConfig("the bot token is not a valid header value".into())
            })?,
        );
        let user_agent = format!(
            "DiscordBot ({}, {}) {}",
            self.user_agent_source_url, self.user_agent_version, self.user_agent_extra
        );
        request_headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(user_agent.trim_end()).map_err(|_| {
                ErrorKind::InvalidConfig("the user agent is not a valid header value".into())
            })?,
        );
        request_headers.insert(X_RATELIMIT_PRECISION, HeaderValue::from_static("millisecond"));

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        // Gzip stays on reqwest's side of the fence: it advertises
        // `Accept-Encoding: gzip` and decompresses transparently. Setting
        // the header by hand would turn that off.
        let http = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(request_headers)
            .timeout(timeout)
            .build()
            .map_err(ErrorKind::BuildRequestClient)?;

        let host = self.api_host.unwrap_or_else(|| BASE_URL.to_owned());
        Ok(Client {
            url: format!("{host}/v{}", self.api_version),
            http,
            timeout,
            cancel_when_rate_limited: false,
            ratelimit: RateLimitManager::new(),
        })
    }
}

/// A successful (or not-modified) response.
#[derive(Debug, Clone)]
pub struct RestResponse {
    /// HTTP status code, 2xx or 304.
    pub status: StatusCode,
    /// The response headers after rate-limit normalization.
    pub headers: HeaderMap,
    /// The decompressed response body.
    pub body: Vec<u8>,
}

/// The HTTP dispatcher.
///
/// Cheap to share by reference; all interior state is behind its own locks.
#[derive(Debug)]
pub struct Client {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    /// Mirror of [`Config::cancel_request_when_rate_limited`]; never set
    /// from the config, so only the per-request flag opts in.
    cancel_when_rate_limited: bool,
    ratelimit: RateLimitManager,
}

impl Client {
    /// The rate-limit manager gating this client's dispatch.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimitManager {
        &self.ratelimit
    }

    /// Issue one request, gated by the rate-limit manager.
    ///
    /// # Errors
    ///
    /// Any of the dispatch error kinds; see [`ErrorKind`]. Transport
    /// failures refund the acquired permit. Non-2xx responses are never
    /// retried here.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<RestResponse> {
        let route = &request.route;
        let (bucket, populated) =
            self.ratelimit
                .bucket(route.class, route.major_id, &route.local_key);

        let within = if request.cancel_on_rate_limit || self.cancel_when_rate_limited {
            RATE_LIMIT_PATIENCE
        } else {
            self.timeout
        };
        let permit = bucket.acquire(SystemTime::now(), within)?;
        if !permit.delay.is_zero() {
            log::debug!(
                "route {} is rate limited, sleeping {}ms",
                route.local_key,
                permit.delay.as_millis()
            );
            tokio::time::sleep(permit.delay).await;
        }

        let url = format!("{}{}", self.url, request.endpoint);
        let outgoing = self
            .http
            .request(request.method.clone(), url.as_str())
            .header(header::CONTENT_TYPE, request.content_type.as_str());
        let outgoing = match request.body {
            Body::Empty => outgoing,
            Body::Bytes(bytes) => outgoing.body(bytes),
            Body::Json(ref value) => {
                if request.content_type != CONTENT_TYPE_JSON {
                    bucket.regret_acquire(permit.ticket);
                    return Err(ErrorKind::Validation(format!(
                        "structured bodies must be sent as {CONTENT_TYPE_JSON}"
                    )));
                }
                match serde_json::to_vec(value) {
                    Ok(bytes) => outgoing.body(bytes),
                    Err(err) => {
                        bucket.regret_acquire(permit.ticket);
                        return Err(ErrorKind::Validation(format!(
                            "cannot encode the request body: {err}"
                        )));
                    }
                }
            }
        };

        let response = match outgoing.send().await {
            Ok(response) => response,
            Err(err) => {
                bucket.regret_acquire(permit.ticket);
                return Err(ErrorKind::NetworkRequest(err));
            }
        };

        let status = response.status();
        let raw_headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(ErrorKind::ReadResponseBody)?
            .to_vec();

        let normalized = headers::normalize(status, raw_headers, &body)?;
        self.ratelimit
            .update_bucket(route.class, route.major_id, &route.local_key, &normalized);
        if !populated {
            // The first response may have disclosed the authoritative
            // bucket key; merge with any route that already claimed it.
            self.ratelimit
                .consolidate(route.class, route.major_id, &bucket);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers::header_i64(&normalized, X_RATELIMIT_RESET_AFTER)
                .and_then(|ms| u64::try_from(ms).ok())
                .unwrap_or_default();
            let global = headers::header_str(&normalized, X_RATELIMIT_GLOBAL) == Some("true");
            return Err(ErrorKind::TooManyRequests {
                retry_after: Duration::from_millis(retry_after),
                global,
            });
        }

        if status == StatusCode::NOT_MODIFIED || status.is_success() {
            return Ok(RestResponse {
                status,
                headers: normalized,
                body,
            });
        }

        Err(ErrorKind::Rest(RestError::from_response(status, &body)))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::ratelimit::headers::epoch_millis;
    use crate::ratelimit::{LocalKey, ResourceClass};
    use crate::request::Route;
    use crate::types::Snowflake;

    fn config() -> Config {
        Config::builder()
            .api_version(6_u8)
            .bot_token("sometoken")
            .user_agent_version("0.1.0")
            .user_agent_source_url("https://example.org/accord")
            .build()
    }

    fn client_for(server: &MockServer) -> Client {
        let mut config = config();
        config.api_host = Some(server.uri());
        config.client().unwrap()
    }

    fn descriptor(method: http::Method, body: Body, content_type: &str) -> RequestDescriptor {
        RequestDescriptor {
            method,
            endpoint: "/channels/42/messages".to_owned(),
            route: Route::new(ResourceClass::Channels, Snowflake::from(42), "messages"),
            body,
            content_type: content_type.to_owned(),
            rate_limit_adjuster: None,
            ignore_cache: false,
            cancel_on_rate_limit: false,
        }
    }

    #[test]
    fn the_config_rejects_unknown_api_versions() {
        let mut config = config();
        config.api_version = 5;
        assert!(matches!(
            config.client(),
            Err(ErrorKind::InvalidConfig(message)) if message.contains("version 5")
        ));
    }

    #[test]
    fn the_config_rejects_a_missing_token() {
        let mut config = config();
        config.bot_token = String::new();
        assert!(matches!(config.client(), Err(ErrorKind::InvalidConfig(_))));
    }

    #[test]
    fn the_config_rejects_an_incomplete_user_agent() {
        let mut config = config();
        config.user_agent_source_url = String::new();
        assert!(matches!(config.client(), Err(ErrorKind::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn a_cold_route_is_dispatched_and_described_by_the_response() {
        let server = MockServer::start().await;
        // The server reports the reset as fractional epoch seconds.
        #[allow(clippy::cast_precision_loss)]
        let reset = epoch_millis(SystemTime::now() + Duration::from_secs(1)) as f64 / 1000.0;
        Mock::given(method("GET"))
            .and(path("/v6/channels/42/messages"))
            .and(header("authorization", "Bot sometoken"))
            .and(header("x-ratelimit-precision", "millisecond"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-limit", "5")
                    .insert_header("x-ratelimit-remaining", "4")
                    .insert_header("x-ratelimit-reset", format!("{reset:.3}").as_str())
                    .insert_header("x-ratelimit-bucket", "xyz")
                    .set_body_raw(b"[]".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let messages = client
            .get_channel_messages(Snowflake::from(42))
            .execute()
            .await
            .unwrap();
        assert!(messages.is_empty());

        let (bucket, populated) = client.rate_limiter().bucket(
            ResourceClass::Channels,
            Snowflake::from(42),
            &LocalKey::from("messages"),
        );
        assert!(populated);
        assert_eq!(bucket.server_key(), "xyz");
        assert_eq!(bucket.with_state(|state| state.limit), 5);
        assert_eq!(bucket.with_state(|state| state.remaining), 4);
    }

    #[tokio::test]
    async fn a_not_modified_response_is_a_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v6/channels/42/messages"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client
            .execute(descriptor(http::Method::GET, Body::Empty, CONTENT_TYPE_JSON))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn a_rest_error_carries_the_server_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v6/channels/42/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_raw(
                br#"{"code": 50013, "message": "Missing Permissions"}"#.to_vec(),
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .create_message(Snowflake::from(42), "hello")
            .execute()
            .await;
        match result {
            Err(ErrorKind::Rest(error)) => {
                assert_eq!(error.http_status, StatusCode::FORBIDDEN);
                assert_eq!(error.code, 50_013);
                assert_eq!(error.message, "Missing Permissions");
            }
            other => panic!("expected a rest error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_global_429_arms_the_emergency_brake() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v6/channels/42/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_raw(
                br#"{"message": "You are being rate limited.", "retry_after": 2000, "global": true}"#
                    .to_vec(),
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client
            .create_message(Snowflake::from(42), "hello")
            .execute()
            .await;
        match result {
            Err(ErrorKind::TooManyRequests {
                retry_after,
                global,
            }) => {
                assert_eq!(retry_after, Duration::from_millis(2_000));
                assert!(global);
            }
            other => panic!("expected a 429 error, got {other:?}"),
        }

        // An unrelated route now refuses fast acquires until the global
        // window passes.
        let (unrelated, _) = client.rate_limiter().bucket(
            ResourceClass::Guilds,
            Snowflake::from(9),
            &LocalKey::from("bans"),
        );
        let refused = unrelated.acquire(SystemTime::now(), Duration::from_millis(100));
        assert!(matches!(refused, Err(ErrorKind::RateLimited)));
    }

    #[tokio::test]
    async fn a_transport_failure_refunds_the_permit() {
        // Nothing listens on this port.
        let mut config = config();
        config.api_host = Some("http://127.0.0.1:1".to_owned());
        config.timeout = Some(Duration::from_millis(500));
        let client = config.client().unwrap();

        let result = client.trigger_typing(Snowflake::from(42)).execute().await;
        assert!(matches!(result, Err(ErrorKind::NetworkRequest(_))));

        let (bucket, populated) = client.rate_limiter().bucket(
            ResourceClass::Channels,
            Snowflake::from(42),
            &LocalKey::from("typing"),
        );
        assert!(populated);
        assert_eq!(bucket.with_state(|state| state.remaining), 1);
    }

    #[tokio::test]
    async fn a_structured_body_requires_the_json_content_type() {
        let server = MockServer::start().await;
        let client = client_for(&server);

        let result = client
            .execute(descriptor(
                http::Method::POST,
                Body::Json(serde_json::json!({"content": "hi"})),
                "text/plain",
            ))
            .await;
        assert!(matches!(result, Err(ErrorKind::Validation(_))));

        // The refused dispatch refunded its permit.
        let (bucket, _) = client.rate_limiter().bucket(
            ResourceClass::Channels,
            Snowflake::from(42),
            &LocalKey::from("messages"),
        );
        assert_eq!(bucket.with_state(|state| state.remaining), 1);
    }
}
