//! Records owned by the durable store.
//!
//! The cache only ever holds copies of these; nothing here has a lifetime of
//! its own beyond what the store returns.

mod ban;
mod group;
mod session;

pub use ban::BannedUser;
pub use group::{ADMIN_GROUP, AccessPerms, DomainScope, Group};
pub use session::{Partition, ParsePartitionError, Session, SessionView};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
#[must_use]
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Current unix time rendered the same way `Session::expires_at` is stored.
#[must_use]
pub fn now_epoch_string() -> String {
    now_unix_seconds().to_string()
}
