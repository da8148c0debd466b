//! Durable store collaborator.
//!
//! The store is authoritative for sessions, groups and bans. Everything the
//! session cache holds can be rebuilt from here.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::model::{Group, Partition, Session};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to decode record: {0}")]
    Decode(String),
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed table access used by the session store and permission evaluator.
///
/// Partition scans classify against the current time the same way the cache
/// does: `expires_at` compared as a string.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Scan one partition.
    async fn get_partition(&self, partition: Partition) -> StoreResult<Vec<Session>>;

    /// Session whose current identity token equals `token`.
    async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>>;

    /// Non-revoked session holding `refresh_token`.
    async fn get_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> StoreResult<Option<Session>>;

    /// Every session of `owner`, oldest first.
    async fn get_sessions_by_owner(&self, owner: &str) -> StoreResult<Vec<Session>>;

    /// Insert or replace by `session_id`.
    async fn put_session(&self, session: &Session) -> StoreResult<()>;

    /// Remove the session keyed by `session_id` and `created_epoch`. Removing
    /// an absent session is not an error.
    async fn delete_session(&self, session_id: &str, created_epoch: i64) -> StoreResult<()>;

    /// Mark every session of `owner` revoked; returns how many changed.
    async fn revoke_sessions_of(&self, owner: &str) -> StoreResult<u64>;

    async fn get_groups_containing(&self, email: &str) -> StoreResult<Vec<Group>>;

    async fn is_banned(&self, email: &str) -> StoreResult<bool>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> StoreResult<()>;
}
