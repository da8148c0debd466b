use super::{DurableStore, StoreError, StoreResult};
use crate::model::{BannedUser, Group, Partition, Session, now_epoch_string};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// In-process store for local deployments and tests.
///
/// Counts partition scans and token lookups so callers can observe whether a
/// read was served by the cache.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    groups: RwLock<Vec<Group>>,
    banned: RwLock<HashMap<String, BannedUser>>,
    partition_reads: AtomicUsize,
    token_reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_group(self, group: Group) -> Self {
        if let Ok(mut groups) = self.groups.write() {
            groups.retain(|g| g.name != group.name);
            groups.push(group);
        }
        self
    }

    #[must_use]
    pub fn with_session(self, session: Session) -> Self {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session.session_id.clone(), session);
        }
        self
    }

    /// Add or refresh a ban.
    ///
    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn ban(&self, user: BannedUser) -> StoreResult<()> {
        let mut banned = self.banned.write().map_err(|_| poisoned())?;
        banned.insert(user.user_email.clone(), user);
        Ok(())
    }

    /// Lift a ban. Revoked sessions stay revoked.
    ///
    /// # Errors
    /// Returns an error if the store lock is poisoned.
    pub fn unban(&self, email: &str) -> StoreResult<()> {
        let mut banned = self.banned.write().map_err(|_| poisoned())?;
        banned.remove(email);
        Ok(())
    }

    /// Make every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn partition_reads(&self) -> usize {
        self.partition_reads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn token_reads(&self) -> usize {
        self.token_reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }

    fn find(&self, pred: impl Fn(&Session) -> bool) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.values().find(|s| pred(s)).cloned())
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_partition(&self, partition: Partition) -> StoreResult<Vec<Session>> {
        self.check()?;
        self.partition_reads.fetch_add(1, Ordering::SeqCst);
        let now = now_epoch_string();
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| partition == Partition::All || s.classify(&now) == partition)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.created_epoch
                .cmp(&b.created_epoch)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(found)
    }

    async fn get_session_by_token(&self, token: &str) -> StoreResult<Option<Session>> {
        self.check()?;
        self.token_reads.fetch_add(1, Ordering::SeqCst);
        self.find(|s| s.identity_token == token)
    }

    async fn get_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> StoreResult<Option<Session>> {
        self.check()?;
        self.find(|s| !s.is_revoked && s.refresh_token == refresh_token)
    }

    async fn get_sessions_by_owner(&self, owner: &str) -> StoreResult<Vec<Session>> {
        self.check()?;
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            a.created_epoch
                .cmp(&b.created_epoch)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(owned)
    }

    async fn put_session(&self, session: &Session) -> StoreResult<()> {
        self.check()?;
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, created_epoch: i64) -> StoreResult<()> {
        self.check()?;
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        if sessions
            .get(session_id)
            .is_some_and(|s| s.created_epoch == created_epoch)
        {
            sessions.remove(session_id);
        }
        Ok(())
    }

    async fn revoke_sessions_of(&self, owner: &str) -> StoreResult<u64> {
        self.check()?;
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        let mut changed = 0;
        for session in sessions.values_mut() {
            if session.owner == owner && !session.is_revoked {
                session.is_revoked = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn get_groups_containing(&self, email: &str) -> StoreResult<Vec<Group>> {
        self.check()?;
        let groups = self.groups.read().map_err(|_| poisoned())?;
        Ok(groups.iter().filter(|g| g.has_member(email)).cloned().collect())
    }

    async fn is_banned(&self, email: &str) -> StoreResult<bool> {
        self.check()?;
        let banned = self.banned.read().map_err(|_| poisoned())?;
        Ok(banned.contains_key(email))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, owner: &str, epoch: i64) -> Session {
        Session {
            session_id: id.to_string(),
            owner: owner.to_string(),
            identity_token: format!("id-{id}"),
            refresh_token: format!("rt-{id}"),
            expires_at: "9999999999".to_string(),
            created_epoch: epoch,
            ..Session::default()
        }
    }

    #[tokio::test]
    async fn create_then_read_by_refresh_token() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let written = session("s1", "a@x.com", 10);
        store.put_session(&written).await?;

        let read = store
            .get_session_by_refresh_token("rt-s1")
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing session"))?;
        assert_eq!(read.identity_token, written.identity_token);
        assert_eq!(read.refresh_token, written.refresh_token);
        assert_eq!(read.previous_identity_token, written.previous_identity_token);
        assert_eq!(read.access_token, written.access_token);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_lookup_skips_revoked() -> anyhow::Result<()> {
        let mut revoked = session("s1", "a@x.com", 10);
        revoked.is_revoked = true;
        let store = MemoryStore::new().with_session(revoked);
        assert!(store.get_session_by_refresh_token("rt-s1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn delete_requires_matching_epoch() -> anyhow::Result<()> {
        let store = MemoryStore::new().with_session(session("s1", "a@x.com", 10));
        store.delete_session("s1", 11).await?;
        assert_eq!(store.get_sessions_by_owner("a@x.com").await?.len(), 1);
        store.delete_session("s1", 10).await?;
        assert!(store.get_sessions_by_owner("a@x.com").await?.is_empty());
        store.delete_session("s1", 10).await?;
        Ok(())
    }

    #[tokio::test]
    async fn partitions_and_counters() -> anyhow::Result<()> {
        let mut expired = session("s2", "b@x.com", 20);
        expired.expires_at = "1".to_string();
        let store = MemoryStore::new()
            .with_session(session("s1", "a@x.com", 10))
            .with_session(expired);

        assert_eq!(store.get_partition(Partition::All).await?.len(), 2);
        assert_eq!(store.get_partition(Partition::Active).await?.len(), 1);
        assert_eq!(store.get_partition(Partition::Expired).await?.len(), 1);
        assert!(store.get_partition(Partition::Revoked).await?.is_empty());
        assert_eq!(store.partition_reads(), 4);

        assert_eq!(store.revoke_sessions_of("a@x.com").await?, 1);
        assert_eq!(store.get_partition(Partition::Revoked).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.is_banned("a@x.com").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.ping().await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
