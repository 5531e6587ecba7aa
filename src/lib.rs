//! `accord` is an async client core for the Discord REST API.
//!
//! Its distinguishing feature is preemptive, per-route rate-limit
//! accounting: every request is gated by a bucket that mirrors the server's
//! dynamic limits, so well-behaved bots never have to learn about a limit
//! by tripping over it. Endpoint bindings hand out deferred
//! [`RequestBuilder`]s; nothing touches the network until `execute`.
//!
//! ```no_run
//! use accord::{Config, Result, Snowflake};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Config::builder()
//!         .api_version(6_u8)
//!         .bot_token("NzA5MDc...")
//!         .user_agent_version("0.1.0")
//!         .user_agent_source_url("https://github.com/example/mybot")
//!         .build()
//!         .client()?;
//!
//!     let messages = client
//!         .get_channel_messages(Snowflake::from(486_833_611_564_253_184))
//!         .url_param("limit", 50)
//!         .execute()
//!         .await?;
//!     println!("fetched {} messages", messages.len());
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod builder;
mod client;
mod request;
mod rest;
mod types;

/// Preemptive, per-route rate limiting.
pub mod ratelimit;

#[doc(inline)]
pub use crate::{
    builder::RequestBuilder,
    client::{Client, Config, RestResponse, BASE_URL, DEFAULT_TIMEOUT},
    ratelimit::{Bucket, BucketTicket, LocalKey, Permit, RateLimitManager, ResourceClass},
    request::{
        Body, RateLimitAdjuster, RequestDescriptor, Route, CONTENT_TYPE_FORM_DATA,
        CONTENT_TYPE_JSON,
    },
    rest::UpdateGuildMemberBuilder,
    types::{ErrorKind, RestError, Result, Snowflake},
};
