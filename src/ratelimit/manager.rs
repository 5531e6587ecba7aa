//! Routing from request descriptors to rate-limit buckets.

use std::sync::Arc;
use std::time::SystemTime;

use http::HeaderMap;

use super::bucket::{Bucket, LocalKey};
use super::group::BucketGroup;
use super::headers::{self, X_RATELIMIT_GLOBAL};
use crate::types::Snowflake;

/// The resource classes the server partitions its rate limits by.
///
/// Requests with the same major parameter inside one class share buckets;
/// [`ResourceClass::Others`] holds everything without a meaningful major
/// parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Channel-scoped endpoints, major parameter is the channel id.
    Channels,
    /// Guild-scoped endpoints, major parameter is the guild id.
    Guilds,
    /// Webhook-scoped endpoints, major parameter is the webhook id.
    Webhooks,
    /// Endpoints without a major parameter.
    Others,
}

/// Routes logical endpoint identifiers to rate-limit buckets and folds
/// response headers back into them.
///
/// A manager is fully self-contained; several managers coexist in one
/// process without interference. Exactly one global bucket exists per
/// manager and is shared by reference with every route bucket it creates.
#[derive(Debug)]
pub struct RateLimitManager {
    channels: BucketGroup,
    guilds: BucketGroup,
    webhooks: BucketGroup,
    others: BucketGroup,
    global: Arc<Bucket>,
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitManager {
    /// A manager with empty groups and an inactive global bucket.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: BucketGroup::default(),
            guilds: BucketGroup::default(),
            webhooks: BucketGroup::default(),
            others: BucketGroup::default(),
            global: Bucket::new_global(),
        }
    }

    fn group(&self, class: ResourceClass) -> &BucketGroup {
        match class {
            ResourceClass::Channels => &self.channels,
            ResourceClass::Guilds => &self.guilds,
            ResourceClass::Webhooks => &self.webhooks,
            ResourceClass::Others => &self.others,
        }
    }

    /// The bucket routing the given triple, created lazily on first use.
    ///
    /// Returns `populated = false` when the bucket was just created; the
    /// dispatcher uses that to consolidate after the first response, once
    /// the server has had a chance to disclose the authoritative key.
    pub fn bucket(
        &self,
        class: ResourceClass,
        major_id: Snowflake,
        local_key: &LocalKey,
    ) -> (Arc<Bucket>, bool) {
        self.group(class).insert_if_absent(major_id, local_key, || {
            let bucket = Bucket::new(Arc::clone(&self.global));
            bucket.add_local_key(local_key.clone());
            bucket
        })
    }

    /// Fold a normalized response header set into the bucket for the triple.
    ///
    /// The local clock and the server's `date` header rarely agree, so the
    /// signed difference between them is added to every absolute timestamp
    /// before it is stored. A `x-ratelimit-global: true` header targets the
    /// manager's global bucket instead and arms the emergency brake.
    pub fn update_bucket(
        &self,
        class: ResourceClass,
        major_id: Snowflake,
        local_key: &LocalKey,
        headers: &HeaderMap,
    ) {
        let (bucket, _) = self.bucket(class, major_id, local_key);

        let now = SystemTime::now();
        let drift_ms = match headers::server_date(headers) {
            Ok(date) => headers::epoch_millis(now) - headers::epoch_millis(date),
            Err(_) => 0,
        };

        if headers::header_str(headers, X_RATELIMIT_GLOBAL) == Some("true") {
            self.global.update(now, headers, drift_ms, true);
        } else {
            bucket.update(now, headers, drift_ms, false);
        }
    }

    /// Merge the bucket with the one already owning its server key, if any.
    pub fn consolidate(&self, class: ResourceClass, major_id: Snowflake, bucket: &Arc<Bucket>) {
        self.group(class).consolidate(major_id, bucket);
    }
}
