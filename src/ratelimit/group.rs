//! Keyed bucket storage for one resource class.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::bucket::{Bucket, LocalKey};
use crate::types::Snowflake;

/// Buckets of one resource class, keyed by major parameter and
/// endpoint-family label.
///
/// Lookups take the read lock; inserts and consolidation take the write
/// lock. The secondary `server_keys` index exists only so consolidation can
/// find the bucket that first claimed a server-disclosed key.
#[derive(Debug, Default)]
pub(crate) struct BucketGroup {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    routes: HashMap<Snowflake, HashMap<LocalKey, Arc<Bucket>>>,
    server_keys: HashMap<Snowflake, HashMap<String, Arc<Bucket>>>,
}

impl BucketGroup {
    pub(crate) fn get(&self, major_id: Snowflake, key: &LocalKey) -> Option<Arc<Bucket>> {
        let inner = self.inner.read().expect("bucket group lock poisoned");
        inner.routes.get(&major_id)?.get(key).cloned()
    }

    /// Insert the bucket produced by `build` unless a concurrent insert won
    /// the race; returns the routed bucket and whether it pre-existed.
    pub(crate) fn insert_if_absent(
        &self,
        major_id: Snowflake,
        key: &LocalKey,
        build: impl FnOnce() -> Arc<Bucket>,
    ) -> (Arc<Bucket>, bool) {
        let mut inner = self.inner.write().expect("bucket group lock poisoned");
        let slot = inner.routes.entry(major_id).or_default();
        if let Some(existing) = slot.get(key) {
            return (Arc::clone(existing), true);
        }
        let bucket = build();
        slot.insert(key.clone(), Arc::clone(&bucket));
        (bucket, false)
    }

    /// Merge the bucket into the one that already owns its server key.
    ///
    /// The first bucket to present a server key claims it. A later bucket
    /// with the same key donates its local keys to the claimant, has its
    /// routes repointed, and is tombstoned; callers still holding it
    /// converge on the claimant at their next routing lookup. Consolidating
    /// the claimant itself, or a bucket without a server key, is a no-op.
    pub(crate) fn consolidate(&self, major_id: Snowflake, bucket: &Arc<Bucket>) {
        let server_key = bucket.server_key();
        if server_key.is_empty() {
            return;
        }

        let mut inner = self.inner.write().expect("bucket group lock poisoned");
        let claimant = inner
            .server_keys
            .entry(major_id)
            .or_default()
            .get(&server_key)
            .cloned();
        match claimant {
            Some(claimant) if Arc::ptr_eq(&claimant, bucket) => {}
            Some(claimant) => {
                let routes = inner.routes.entry(major_id).or_default();
                for key in bucket.local_keys() {
                    claimant.add_local_key(key.clone());
                    routes.insert(key, Arc::clone(&claimant));
                }
                bucket.mark_invalid();
            }
            None => {
                inner
                    .server_keys
                    .entry(major_id)
                    .or_default()
                    .insert(server_key, Arc::clone(bucket));
            }
        }
    }
}
