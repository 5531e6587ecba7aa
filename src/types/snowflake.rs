use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque 64-bit identifier handed out by the server.
///
/// Snowflakes identify channels, guilds, users and most other entities.
/// The zero value is the sentinel for "unset"; endpoint bindings use it to
/// reject requests that were never given a real identifier.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Snowflake(u64);

impl Snowflake {
    /// The "unset" sentinel.
    pub const UNSET: Snowflake = Snowflake(0);

    /// Whether this snowflake still carries the unset sentinel.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<Snowflake> for u64 {
    fn from(id: Snowflake) -> Self {
        id.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
