//! A single rate-limit window and its acquire protocol.
//!
//! Every route resolves to one [`Bucket`]. Acquiring consumes a permit and
//! may return a delay the caller has to sleep out first; regretting refunds
//! the permit when the request never reached the wire. Each bucket holds a
//! shared reference to the one global bucket, which acts as an emergency
//! brake: while it is active every acquire in the process waits on it
//! before consulting its own window.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use http::HeaderMap;

use super::headers::{
    self, X_RATELIMIT_BUCKET, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
use crate::types::{ErrorKind, Result};

/// Window granted to a bucket the server has not described yet. Wide enough
/// that the first response arrives long before the probe would be reissued.
const SEED_WINDOW: Duration = Duration::from_secs(60 * 60);

/// An endpoint-family label chosen by the endpoint binding, such as
/// `"messages"` or `"pins"`.
///
/// Routes requests to a bucket until the server discloses the authoritative
/// bucket key, at which point several local keys may converge on one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalKey(String);

impl LocalKey {
    /// The label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocalKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for LocalKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle returned by [`Bucket::acquire`].
///
/// Carries which bucket granted the permit and the reset observed at
/// acquire time, so a refund can be discarded once the window rolled over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketTicket {
    global: bool,
    reset: SystemTime,
}

/// A granted permit.
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    /// How long the caller must sleep before issuing the request.
    pub delay: Duration,
    /// Whether the permit was reserved out of an exhausted window.
    pub rate_limited: bool,
    /// Refund handle for [`Bucket::regret_acquire`].
    pub ticket: BucketTicket,
}

/// Rate-limit accounting for one server-side window.
#[derive(Debug)]
pub struct Bucket {
    state: Mutex<State>,
    /// Back-reference to the shared global bucket, `None` for the global
    /// bucket itself. The global bucket outlives every local one.
    global: Option<Arc<Bucket>>,
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) server_key: String,
    pub(crate) local_keys: Vec<LocalKey>,
    pub(crate) invalid: bool,
    pub(crate) last_updated: Option<SystemTime>,
    pub(crate) limit: u32,
    /// Signed on purpose: reserving a slot out of an exhausted window drives
    /// the counter below zero until the next refresh reseeds it.
    pub(crate) remaining: i64,
    pub(crate) reset: SystemTime,
    pub(crate) longest_timeout: Duration,
    pub(crate) shortest_timeout: Duration,
    pub(crate) active: bool,
}

impl State {
    fn seeded() -> Self {
        Self {
            server_key: String::new(),
            local_keys: Vec::new(),
            invalid: false,
            last_updated: None,
            limit: 1,
            remaining: 1,
            reset: SystemTime::now() + SEED_WINDOW,
            longest_timeout: Duration::ZERO,
            shortest_timeout: Duration::ZERO,
            active: false,
        }
    }

    fn acquire(&mut self, now: SystemTime, within: Duration) -> Result<(Duration, bool)> {
        self.refresh(now);
        if self.limited(now) {
            if !within.is_zero() && self.reset < now + within {
                // Spend a slot out of the upcoming window instead of
                // refusing; the caller is willing to sleep the window out.
                self.remaining -= 1;
                let delay = self.reset.duration_since(now).unwrap_or_default();
                return Ok((delay, true));
            }
            return Err(ErrorKind::RateLimited);
        }

        self.remaining -= 1;
        Ok((Duration::ZERO, false))
    }

    /// Simulate the window rollover the server performed in the meantime.
    /// Only one probe is granted until a response brings fresh header data.
    fn refresh(&mut self, now: SystemTime) {
        if self.longest_timeout.is_zero() {
            return;
        }
        if self.reset <= now {
            self.remaining = 1;
            self.reset = now + self.longest_timeout;
        }
        self.last_updated = Some(now);
    }

    fn limited(&self, now: SystemTime) -> bool {
        self.reset > now && self.remaining == 0
    }
}

impl Bucket {
    /// The process-wide emergency brake. Starts inactive.
    pub(crate) fn new_global() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::seeded()),
            global: None,
        })
    }

    /// A fresh route bucket wired to the shared global bucket.
    ///
    /// Seeded with `limit = remaining = 1` and a one-hour reset: permissive
    /// enough to let the first probe through, strict enough that concurrent
    /// cold requests on the same route serialize until headers arrive.
    pub(crate) fn new(global: Arc<Bucket>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::seeded()),
            global: Some(global),
        })
    }

    /// Obtain a permit for one request.
    ///
    /// The global bucket is consulted first and short-circuits while active;
    /// its lock is released before the local lock is taken, so the lock
    /// order is always global before local. The returned delay is how long
    /// the caller must sleep before sending. `within` is the caller's
    /// patience: when the exhausted window ends later than `now + within`
    /// the acquire is refused with [`ErrorKind::RateLimited`] and no permit
    /// is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RateLimited`] when the bucket is exhausted and
    /// the caller is unwilling to wait for the window to end.
    pub fn acquire(&self, now: SystemTime, within: Duration) -> Result<Permit> {
        if let Some(global) = &self.global {
            let mut brake = global.state.lock().expect("global bucket lock poisoned");
            if brake.active && brake.reset <= now {
                // The global window has passed; release the brake and fall
                // through to per-route accounting.
                brake.active = false;
            }
            if brake.active {
                let (delay, rate_limited) = brake.acquire(now, within)?;
                return Ok(Permit {
                    delay,
                    rate_limited,
                    ticket: BucketTicket {
                        global: true,
                        reset: brake.reset,
                    },
                });
            }
        }

        let mut state = self.state.lock().expect("bucket lock poisoned");
        let (delay, rate_limited) = state.acquire(now, within)?;
        Ok(Permit {
            delay,
            rate_limited,
            ticket: BucketTicket {
                global: false,
                reset: state.reset,
            },
        })
    }

    /// Refund a permit that was acquired but never spent on the wire.
    ///
    /// The refund only lands while the window the ticket was drawn from is
    /// still current; after a rollover the slot has already been reissued
    /// and the stale ticket is discarded.
    pub fn regret_acquire(&self, ticket: BucketTicket) {
        let target = if ticket.global {
            self.global.as_deref().unwrap_or(self)
        } else {
            self
        };
        let mut state = target.state.lock().expect("bucket lock poisoned");
        if state.reset == ticket.reset {
            state.remaining += 1;
        }
    }

    /// Fold the canonical rate-limit headers into this bucket.
    ///
    /// `drift_ms` is the signed difference between the local clock and the
    /// server's `date` header; absolute timestamps are shifted by it so the
    /// stored reset is comparable with the local clock. `activate` arms the
    /// emergency brake and is only passed for the global bucket.
    pub(crate) fn update(
        &self,
        now: SystemTime,
        headers: &HeaderMap,
        drift_ms: i64,
        activate: bool,
    ) {
        let mut state = self.state.lock().expect("bucket lock poisoned");

        if let Some(reset_ms) = headers::header_i64(headers, X_RATELIMIT_RESET) {
            state.reset = headers::from_epoch_millis(reset_ms + drift_ms);
            if let Ok(width) = state.reset.duration_since(now) {
                if width > state.longest_timeout {
                    state.longest_timeout = width;
                }
                if state.shortest_timeout.is_zero() || width < state.shortest_timeout {
                    state.shortest_timeout = width;
                }
            }
        }
        if let Some(remaining) = headers::header_i64(headers, X_RATELIMIT_REMAINING) {
            state.remaining = remaining;
        }
        if let Some(limit) = headers::header_i64(headers, X_RATELIMIT_LIMIT) {
            state.limit = u32::try_from(limit).unwrap_or(0);
        }
        if let Some(key) = headers::header_str(headers, X_RATELIMIT_BUCKET) {
            if !key.is_empty() {
                key.clone_into(&mut state.server_key);
            }
        }
        if activate {
            state.active = true;
        }
        state.last_updated = Some(now);
    }

    /// The most recent server-declared request limit for this window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.state.lock().expect("bucket lock poisoned").limit
    }

    /// Permits left in the current window. Transiently negative while a
    /// caller holds a reservation against the next window.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.state.lock().expect("bucket lock poisoned").remaining
    }

    /// When the current window expires.
    #[must_use]
    pub fn reset(&self) -> SystemTime {
        self.state.lock().expect("bucket lock poisoned").reset
    }

    /// When this bucket last folded in a response or simulated a rollover.
    #[must_use]
    pub fn last_updated(&self) -> Option<SystemTime> {
        self.state.lock().expect("bucket lock poisoned").last_updated
    }

    /// Whether the given endpoint-family label already routes to this bucket.
    #[must_use]
    pub fn linked_to(&self, key: &LocalKey) -> bool {
        self.state
            .lock()
            .expect("bucket lock poisoned")
            .local_keys
            .contains(key)
    }

    /// Whether this bucket was consolidated away and no longer receives
    /// routing lookups.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.state.lock().expect("bucket lock poisoned").invalid
    }

    pub(crate) fn add_local_key(&self, key: LocalKey) {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        if !state.local_keys.contains(&key) {
            state.local_keys.push(key);
        }
    }

    pub(crate) fn local_keys(&self) -> Vec<LocalKey> {
        self.state
            .lock()
            .expect("bucket lock poisoned")
            .local_keys
            .clone()
    }

    pub(crate) fn server_key(&self) -> String {
        self.state
            .lock()
            .expect("bucket lock poisoned")
            .server_key
            .clone()
    }

    pub(crate) fn mark_invalid(&self) {
        self.state.lock().expect("bucket lock poisoned").invalid = true;
    }
}

#[cfg(test)]
impl Bucket {
    /// Test hook for inspecting and seeding the guarded state.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn at(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn bucket() -> Arc<Bucket> {
        Bucket::new(Bucket::new_global())
    }

    fn exhaust(bucket: &Bucket, limit: u32, reset: SystemTime, window: Duration) {
        bucket.with_state(|state| {
            state.limit = limit;
            state.remaining = 0;
            state.reset = reset;
            state.longest_timeout = window;
        });
    }

    #[test]
    fn a_fresh_bucket_admits_a_single_probe() {
        let bucket = bucket();
        let permit = bucket.acquire(at(1_000), Duration::ZERO).unwrap();
        assert_eq!(permit.delay, Duration::ZERO);
        assert!(!permit.rate_limited);
        assert_eq!(bucket.with_state(|state| state.remaining), 0);
    }

    #[test]
    fn a_patient_caller_reserves_a_slot_from_the_next_window() {
        let bucket = bucket();
        exhaust(&bucket, 5, at(1_150), Duration::from_secs(1));

        let permit = bucket
            .acquire(at(1_000), Duration::from_millis(500))
            .unwrap();
        assert_eq!(permit.delay, Duration::from_millis(150));
        assert!(permit.rate_limited);
        assert_eq!(bucket.with_state(|state| state.remaining), -1);
    }

    #[test]
    fn an_impatient_caller_is_refused_without_spending_a_permit() {
        let bucket = bucket();
        exhaust(&bucket, 5, at(1_400), Duration::from_secs(1));

        let result = bucket.acquire(at(1_000), Duration::from_millis(200));
        assert!(matches!(result, Err(ErrorKind::RateLimited)));
        assert_eq!(bucket.with_state(|state| state.remaining), 0);

        // The same patience is enough once the window ends sooner.
        exhaust(&bucket, 5, at(1_150), Duration::from_secs(1));
        let permit = bucket
            .acquire(at(1_000), Duration::from_millis(200))
            .unwrap();
        assert_eq!(permit.delay, Duration::from_millis(150));
    }

    #[test]
    fn the_rollover_grants_one_probe_only() {
        let bucket = bucket();
        exhaust(&bucket, 5, at(1_000), Duration::from_secs(1));

        let permit = bucket.acquire(at(1_500), Duration::ZERO).unwrap();
        assert!(!permit.rate_limited);
        assert_eq!(bucket.with_state(|state| state.remaining), 0);
        assert_eq!(bucket.with_state(|state| state.reset), at(2_500));

        let result = bucket.acquire(at(1_600), Duration::ZERO);
        assert!(matches!(result, Err(ErrorKind::RateLimited)));
    }

    #[test]
    fn a_regret_refunds_the_permit_within_the_same_window() {
        let bucket = bucket();
        bucket.with_state(|state| {
            state.limit = 3;
            state.remaining = 3;
            state.reset = at(10_000);
            state.longest_timeout = Duration::from_secs(5);
        });

        let permit = bucket.acquire(at(1_000), Duration::ZERO).unwrap();
        assert_eq!(bucket.with_state(|state| state.remaining), 2);
        bucket.regret_acquire(permit.ticket);
        assert_eq!(bucket.with_state(|state| state.remaining), 3);
    }

    #[test]
    fn a_regret_after_the_rollover_is_discarded() {
        let bucket = bucket();
        exhaust(&bucket, 5, at(1_100), Duration::from_secs(1));

        let permit = bucket
            .acquire(at(1_000), Duration::from_millis(500))
            .unwrap();
        assert!(permit.rate_limited);

        // The window rolls over; the refresh reissues the reserved slot.
        let probe = bucket.acquire(at(1_200), Duration::ZERO).unwrap();
        assert!(!probe.rate_limited);
        assert_eq!(bucket.with_state(|state| state.remaining), 0);

        bucket.regret_acquire(permit.ticket);
        assert_eq!(bucket.with_state(|state| state.remaining), 0);
    }

    #[test]
    fn permits_are_conserved_over_acquires_and_regrets() {
        let bucket = bucket();
        bucket.with_state(|state| {
            state.limit = 3;
            state.remaining = 3;
            state.reset = at(60_000);
            state.longest_timeout = Duration::from_secs(60);
        });

        let tickets: Vec<_> = (0..3)
            .map(|_| bucket.acquire(at(1_000), Duration::ZERO).unwrap().ticket)
            .collect();
        assert!(matches!(
            bucket.acquire(at(1_000), Duration::ZERO),
            Err(ErrorKind::RateLimited)
        ));

        bucket.regret_acquire(tickets[0]);
        assert!(bucket.acquire(at(1_000), Duration::ZERO).is_ok());
        assert!(matches!(
            bucket.acquire(at(1_000), Duration::ZERO),
            Err(ErrorKind::RateLimited)
        ));
    }

    #[test]
    fn an_active_global_bucket_gates_every_acquire() {
        let global = Bucket::new_global();
        global.with_state(|state| {
            state.active = true;
            state.remaining = 0;
            state.reset = at(2_000);
            state.longest_timeout = Duration::from_secs(1);
        });
        let bucket = Bucket::new(Arc::clone(&global));

        let permit = bucket.acquire(at(1_000), Duration::from_secs(5)).unwrap();
        assert!(permit.rate_limited);
        assert_eq!(permit.delay, Duration::from_millis(1_000));
        assert_eq!(global.with_state(|state| state.remaining), -1);
        // The local window is untouched.
        assert_eq!(bucket.with_state(|state| state.remaining), 1);
    }

    #[test]
    fn the_global_brake_releases_once_its_window_passes() {
        let global = Bucket::new_global();
        global.with_state(|state| {
            state.active = true;
            state.remaining = 0;
            state.reset = at(2_000);
            state.longest_timeout = Duration::from_secs(1);
        });
        let bucket = Bucket::new(Arc::clone(&global));

        let permit = bucket.acquire(at(2_500), Duration::ZERO).unwrap();
        assert!(!permit.rate_limited);
        assert!(!global.with_state(|state| state.active));
        assert_eq!(bucket.with_state(|state| state.remaining), 0);
    }
}
