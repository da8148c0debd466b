//! Read-through session store.
//!
//! Reads prefer the partitioned in-memory cache and always fall back to the
//! durable store. Writes go to the durable store first; renewals then clear
//! and reload the whole cache and tell peers to do the same.

mod cache;

pub use cache::{PartitionSizes, SessionCache};

use crate::{
    cluster::{ClusterCoordinator, InvalidationFeed},
    model::{Partition, Session, now_epoch_string, now_unix_seconds},
    store::{DurableStore, StoreResult},
};
use chrono::{SecondsFormat, Utc};
use std::{fmt, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use ulid::Ulid;

/// Invalidation name covering every session partition.
pub const SESSION_PARTITION: &str = "session";

pub const DEFAULT_SESSION_MAX_LENGTH_SECONDS: i64 = 86_400;
pub const DEFAULT_MAX_SESSIONS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    max_length_seconds: i64,
    max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_length_seconds: DEFAULT_SESSION_MAX_LENGTH_SECONDS,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn with_max_length_seconds(mut self, seconds: i64) -> Self {
        self.max_length_seconds = seconds;
        self
    }

    /// Zero disables pruning.
    #[must_use]
    pub const fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    #[must_use]
    pub const fn max_length_seconds(&self) -> i64 {
        self.max_length_seconds
    }

    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// Token material from a completed login, before it becomes a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    /// Client chosen id; a fresh ULID when absent.
    pub session_id: Option<String>,
    pub owner: String,
    pub identity_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: String,
}

pub struct SessionStore {
    store: Arc<dyn DurableStore>,
    cache: SessionCache,
    cluster: Arc<ClusterCoordinator>,
    config: SessionConfig,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("cache", &self.cache.sizes())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        cluster: Arc<ClusterCoordinator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            cache: SessionCache::new(),
            cluster,
            config,
        }
    }

    #[must_use]
    pub fn cluster(&self) -> &Arc<ClusterCoordinator> {
        &self.cluster
    }

    #[must_use]
    pub fn cache_sizes(&self) -> PartitionSizes {
        self.cache.sizes()
    }

    /// Sessions in `partition`.
    ///
    /// Before the cache is ready this reads the store and fills the cache as a
    /// side effect. Afterwards an empty cached partition is treated as a miss,
    /// so a partition that is really empty is fetched from the store each time.
    ///
    /// # Errors
    /// Returns the store error when the durable store has to be read and fails.
    #[instrument(skip(self))]
    pub async fn get_sessions(&self, partition: Partition) -> StoreResult<Vec<Session>> {
        if self.cluster.is_cache_ready() {
            if let Some(sessions) = self.cache.get(partition, &now_epoch_string()) {
                return Ok(sessions);
            }
            debug!(%partition, "session cache miss");
        }

        let generation = self.cache.generation();
        let sessions = self.store.get_partition(partition).await?;
        self.cache
            .fill(partition, &sessions, &now_epoch_string(), generation);
        self.cluster.mark_cache_ready();
        Ok(sessions)
    }

    /// Session whose current identity token is `token`. Cache misses of any
    /// kind go to the store; only the store's answer is final.
    ///
    /// # Errors
    /// Returns the store error if the fallback lookup fails.
    pub async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>> {
        if self.cluster.is_cache_ready()
            && let Some(session) = self.cache.find_active_by_token(token, &now_epoch_string())
        {
            return Ok(Some(session));
        }
        self.store.get_session_by_token(token).await
    }

    /// # Errors
    /// Returns the store error unchanged.
    pub async fn get_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> StoreResult<Option<Session>> {
        self.store.get_session_by_refresh_token(refresh_token).await
    }

    /// # Errors
    /// Returns the store error unchanged.
    pub async fn get_sessions_by_owner(&self, owner: &str) -> StoreResult<Vec<Session>> {
        self.store.get_sessions_by_owner(owner).await
    }

    /// Insert sessions into the cache without touching the store.
    pub fn fill_cache(&self, partition: Partition, sessions: &[Session]) {
        self.cache.fill(
            partition,
            sessions,
            &now_epoch_string(),
            self.cache.generation(),
        );
    }

    /// Write through to the store only; the cache sees it on the next fill.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn create_session(&self, session: &Session) -> StoreResult<()> {
        self.store.put_session(session).await
    }

    /// Build a session from a completed login, store it, then prune the
    /// owner's oldest sessions beyond the configured maximum.
    ///
    /// # Errors
    /// Returns the store error if the write or the pruning fails.
    #[instrument(skip(self, new), fields(owner = %new.owner))]
    pub async fn open_session(&self, new: NewSession) -> StoreResult<Session> {
        let created_epoch = now_unix_seconds();
        let session = Session {
            session_id: new
                .session_id
                .unwrap_or_else(|| Ulid::new().to_string()),
            owner: new.owner,
            identity_token: new.identity_token,
            previous_identity_token: String::new(),
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            token_type: new.token_type,
            expires_at: new.expires_at,
            created_epoch,
            expiry_epoch: created_epoch + self.config.max_length_seconds,
            refresh_count: 0,
            is_revoked: false,
            details: String::new(),
        };
        self.create_session(&session).await?;
        info!(session_id = %session.session_id, "session opened");
        self.prune_sessions(&session.owner).await?;
        Ok(session)
    }

    /// Delete `owner`'s oldest sessions until at most the configured maximum
    /// remain. Returns how many were removed.
    ///
    /// # Errors
    /// Returns the store error if listing or deleting fails.
    pub async fn prune_sessions(&self, owner: &str) -> StoreResult<usize> {
        if self.config.max_sessions == 0 {
            return Ok(0);
        }
        let sessions = self.store.get_sessions_by_owner(owner).await?;
        let excess = sessions.len().saturating_sub(self.config.max_sessions);
        for session in sessions.iter().take(excess) {
            self.delete_session(&session.session_id, session.created_epoch)
                .await?;
        }
        if excess > 0 {
            info!(owner, pruned = excess, "pruned old sessions");
        }
        Ok(excess)
    }

    /// Remove from the store and local cache, then ask peers to reload
    /// when any are known.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn delete_session(&self, session_id: &str, created_epoch: i64) -> StoreResult<()> {
        self.store.delete_session(session_id, created_epoch).await?;
        self.cache.evict(session_id);
        self.notify_peers().await;
        Ok(())
    }

    /// Record a silent renewal on the session holding `refresh_token`.
    ///
    /// Returns `Ok(false)` when no live session holds that refresh token. On
    /// success with the cache active, every partition is cleared and reloaded
    /// before returning. Peers are told to reload either way.
    ///
    /// # Errors
    /// Returns the store error if the lookup or the write fails.
    #[instrument(skip_all)]
    pub async fn update_session(
        &self,
        previous_token: &str,
        new_token: &str,
        new_expiry: &str,
        refresh_token: &str,
    ) -> StoreResult<bool> {
        let Some(mut session) = self.store.get_session_by_refresh_token(refresh_token).await? else {
            warn!("no live session for refresh token");
            return Ok(false);
        };

        session.previous_identity_token = previous_token.to_string();
        session.identity_token = new_token.to_string();
        session.expires_at = new_expiry.to_string();
        session.refresh_count += 1;
        session.details = format!(
            "Token is renewed at {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        self.store.put_session(&session).await?;
        info!(session_id = %session.session_id, refresh_count = session.refresh_count, "session renewed");

        if self.cluster.is_cache_ready() {
            self.reload_all().await;
        }
        self.notify_peers().await;
        Ok(true)
    }

    /// Revoke every session of `owner` in the store. Revoked sessions are
    /// never reinstated, even if the owner is later unbanned.
    ///
    /// # Errors
    /// Returns the store error unchanged.
    pub async fn revoke_sessions_of(&self, owner: &str) -> StoreResult<u64> {
        let changed = self.store.revoke_sessions_of(owner).await?;
        if changed > 0 {
            warn!(owner, revoked = changed, "sessions revoked");
            if self.cluster.is_cache_ready() {
                self.reload_all().await;
            }
            self.notify_peers().await;
        }
        Ok(changed)
    }

    /// Ask every peer to reload all session partitions. Peers keep their own
    /// caches, so this runs whether or not the local cache is warm.
    async fn notify_peers(&self) {
        if self.cluster.has_audience() {
            self.cluster.invalidate(SESSION_PARTITION).await;
        }
    }

    /// Fill every partition from the store and mark the cache ready.
    /// Returns how many sessions were loaded.
    ///
    /// # Errors
    /// Returns the store error if the sessions cannot be read.
    #[instrument(skip(self))]
    pub async fn warm(&self) -> StoreResult<usize> {
        let sessions = self.get_sessions(Partition::All).await?;
        info!(sessions = sessions.len(), "session cache warmed");
        Ok(sessions.len())
    }

    /// Clear the cache and refill every partition from the store. A failed
    /// partition read leaves that partition empty, which readers treat as a miss.
    async fn reload_all(&self) {
        self.cache.clear();
        let generation = self.cache.generation();
        for partition in Partition::EVERY {
            match self.store.get_partition(partition).await {
                Ok(sessions) => {
                    self.cache
                        .fill(partition, &sessions, &now_epoch_string(), generation);
                }
                Err(err) => warn!(%partition, error = %err, "cache reload failed"),
            }
        }
    }

    /// React to an invalidation notice from a peer. `session` reloads every
    /// partition; a single partition name reloads only that one.
    ///
    /// # Errors
    /// Returns the store error if a partition cannot be read.
    pub async fn apply_invalidation(&self, name: &str) -> StoreResult<()> {
        if name == SESSION_PARTITION {
            self.cache.clear();
            let generation = self.cache.generation();
            for partition in Partition::EVERY {
                let sessions = self.store.get_partition(partition).await?;
                self.cache
                    .fill(partition, &sessions, &now_epoch_string(), generation);
            }
            return Ok(());
        }

        let Ok(partition) = name.parse::<Partition>() else {
            debug!(name, "invalidation for data this instance does not cache");
            return Ok(());
        };
        let generation = self.cache.generation();
        let sessions = self.store.get_partition(partition).await?;
        if !self
            .cache
            .replace(partition, &sessions, &now_epoch_string(), generation)
        {
            debug!(%partition, "reload superseded by a newer clear");
        }
        Ok(())
    }

    /// Apply every notice from `feed` until the coordinator goes away.
    pub fn follow(self: Arc<Self>, mut feed: InvalidationFeed) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(name) = feed.recv().await {
                if let Err(err) = self.apply_invalidation(&name).await {
                    warn!(%name, error = %err, "failed to apply invalidation");
                }
            }
            debug!("invalidation feed closed");
        })
    }
}
