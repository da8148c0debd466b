use crate::model::{Partition, Session};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Four partitions behind one lock. `all` holds every cached session; each
/// session also sits in exactly one live bucket.
///
/// Every clear bumps `generation`. Fills carry the generation observed before
/// their store read and are dropped if it moved, so data read before a
/// renewal can never land after it.
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: RwLock<Buckets>,
}

#[derive(Debug, Default)]
struct Buckets {
    all: HashMap<String, Session>,
    active: HashMap<String, Session>,
    expired: HashMap<String, Session>,
    revoked: HashMap<String, Session>,
    loaded: [bool; 4],
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionSizes {
    pub all: usize,
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
}

const fn slot(partition: Partition) -> usize {
    match partition {
        Partition::All => 0,
        Partition::Active => 1,
        Partition::Expired => 2,
        Partition::Revoked => 3,
    }
}

impl Buckets {
    fn bucket(&self, partition: Partition) -> &HashMap<String, Session> {
        match partition {
            Partition::All => &self.all,
            Partition::Active => &self.active,
            Partition::Expired => &self.expired,
            Partition::Revoked => &self.revoked,
        }
    }

    fn bucket_mut(&mut self, partition: Partition) -> &mut HashMap<String, Session> {
        match partition {
            Partition::All => &mut self.all,
            Partition::Active => &mut self.active,
            Partition::Expired => &mut self.expired,
            Partition::Revoked => &mut self.revoked,
        }
    }

    /// Put `session` in its live bucket and take it out of the other two.
    fn place(&mut self, session: &Session, now: &str) {
        let target = session.classify(now);
        for partition in Partition::LIVE {
            if partition == target {
                self.bucket_mut(partition)
                    .insert(session.session_id.clone(), session.clone());
            } else {
                self.bucket_mut(partition).remove(&session.session_id);
            }
        }
    }

    fn has_drifted(&self, now: &str) -> bool {
        self.active
            .values()
            .any(|s| s.classify(now) != Partition::Active)
    }

    /// Move active sessions whose expiry has passed since they were placed.
    fn rebalance(&mut self, now: &str) {
        let drifted: Vec<String> = self
            .active
            .values()
            .filter(|s| s.classify(now) != Partition::Active)
            .map(|s| s.session_id.clone())
            .collect();
        for id in drifted {
            if let Some(session) = self.active.remove(&id) {
                self.place(&session, now);
            }
        }
    }
}

fn sorted(sessions: impl Iterator<Item = Session>) -> Vec<Session> {
    let mut sessions: Vec<Session> = sessions.collect();
    sessions.sort_by(|a, b| {
        a.created_epoch
            .cmp(&b.created_epoch)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    sessions
}

impl SessionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access with every active session still active at `now`. The
    /// write lock is only taken when something has to move.
    fn settled(&self, now: &str) -> RwLockReadGuard<'_, Buckets> {
        let buckets = self.read();
        if !buckets.has_drifted(now) {
            return buckets;
        }
        drop(buckets);
        self.write().rebalance(now);
        self.read()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Cached sessions of `partition`, or `None` on a miss. A partition that
    /// was never filled and one that is empty both count as a miss.
    #[must_use]
    pub fn get(&self, partition: Partition, now: &str) -> Option<Vec<Session>> {
        let buckets = self.settled(now);
        let bucket = buckets.bucket(partition);
        if !buckets.loaded[slot(partition)] || bucket.is_empty() {
            return None;
        }
        Some(sorted(bucket.values().cloned()))
    }

    /// Active session carrying `token`, if cached.
    #[must_use]
    pub fn find_active_by_token(&self, token: &str, now: &str) -> Option<Session> {
        self.settled(now)
            .active
            .values()
            .find(|s| s.identity_token == token)
            .cloned()
    }

    /// Idempotent insert of sessions read for `partition`. `all` only gains
    /// sessions it does not hold yet; live buckets are re-derived per session.
    /// Returns false when `generation` is stale and nothing was stored.
    pub fn fill(
        &self,
        partition: Partition,
        sessions: &[Session],
        now: &str,
        generation: u64,
    ) -> bool {
        let mut buckets = self.write();
        if buckets.generation != generation {
            return false;
        }
        for session in sessions {
            buckets
                .all
                .entry(session.session_id.clone())
                .or_insert_with(|| session.clone());
            buckets.place(session, now);
        }
        if partition == Partition::All {
            buckets.loaded = [true; 4];
        } else {
            buckets.loaded[slot(partition)] = true;
        }
        true
    }

    /// Replace `partition` wholesale. Replacing `all` re-derives every bucket.
    /// Returns false when `generation` is stale.
    pub fn replace(
        &self,
        partition: Partition,
        sessions: &[Session],
        now: &str,
        generation: u64,
    ) -> bool {
        let mut buckets = self.write();
        if buckets.generation != generation {
            return false;
        }
        if partition == Partition::All {
            let generation = buckets.generation;
            *buckets = Buckets {
                generation,
                ..Buckets::default()
            };
            for session in sessions {
                buckets
                    .all
                    .insert(session.session_id.clone(), session.clone());
                buckets.place(session, now);
            }
            buckets.loaded = [true; 4];
            return true;
        }

        buckets.bucket_mut(partition).clear();
        for session in sessions {
            buckets
                .all
                .insert(session.session_id.clone(), session.clone());
            buckets.place(session, now);
        }
        buckets.loaded[slot(partition)] = true;
        true
    }

    /// Drop every partition and invalidate fills already in flight.
    pub fn clear(&self) {
        let mut buckets = self.write();
        let generation = buckets.generation.wrapping_add(1);
        *buckets = Buckets {
            generation,
            ..Buckets::default()
        };
    }

    /// Remove one session from every partition.
    pub fn evict(&self, session_id: &str) {
        let mut buckets = self.write();
        for partition in Partition::EVERY {
            buckets.bucket_mut(partition).remove(session_id);
        }
    }

    #[must_use]
    pub fn sizes(&self) -> PartitionSizes {
        let buckets = self.read();
        PartitionSizes {
            all: buckets.all.len(),
            active: buckets.active.len(),
            expired: buckets.expired.len(),
            revoked: buckets.revoked.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "1700000000";

    fn session(id: &str, expires_at: &str, is_revoked: bool) -> Session {
        Session {
            session_id: id.to_string(),
            owner: format!("{id}@x.com"),
            identity_token: format!("tok-{id}"),
            refresh_token: format!("rt-{id}"),
            expires_at: expires_at.to_string(),
            is_revoked,
            ..Session::default()
        }
    }

    fn sample() -> Vec<Session> {
        vec![
            session("a", "1800000000", false),
            session("b", "1600000000", false),
            session("c", "1800000000", true),
            session("d", "1700000000", false),
        ]
    }

    fn live_memberships(cache: &SessionCache, id: &str) -> usize {
        Partition::LIVE
            .iter()
            .filter(|p| {
                cache
                    .get(**p, NOW)
                    .is_some_and(|s| s.iter().any(|s| s.session_id == id))
            })
            .count()
    }

    #[test]
    fn every_session_in_exactly_one_live_partition() {
        let cache = SessionCache::new();
        assert!(cache.fill(Partition::All, &sample(), NOW, cache.generation()));

        let all = cache.get(Partition::All, NOW).unwrap_or_default();
        assert_eq!(all.len(), 4);
        for s in &all {
            assert_eq!(live_memberships(&cache, &s.session_id), 1, "{}", s.session_id);
        }
        assert_eq!(
            cache.sizes(),
            PartitionSizes {
                all: 4,
                active: 1,
                expired: 2,
                revoked: 1
            }
        );
    }

    #[test]
    fn fill_is_idempotent() {
        let cache = SessionCache::new();
        let generation = cache.generation();
        assert!(cache.fill(Partition::Active, &sample(), NOW, generation));
        assert!(cache.fill(Partition::Active, &sample(), NOW, generation));
        assert_eq!(cache.sizes().all, 4);
        assert_eq!(cache.sizes().active, 1);
    }

    #[test]
    fn empty_or_unfilled_partition_is_a_miss() {
        let cache = SessionCache::new();
        assert!(cache.get(Partition::Active, NOW).is_none());

        let only_active = vec![session("a", "1800000000", false)];
        cache.fill(Partition::Active, &only_active, NOW, cache.generation());
        assert!(cache.get(Partition::Active, NOW).is_some());
        // loaded but legitimately empty: still reported as a miss
        cache.fill(Partition::Revoked, &[], NOW, cache.generation());
        assert!(cache.get(Partition::Revoked, NOW).is_none());
    }

    #[test]
    fn stale_generation_is_dropped() {
        let cache = SessionCache::new();
        let before = cache.generation();
        cache.clear();
        assert!(!cache.fill(Partition::All, &sample(), NOW, before));
        assert!(!cache.replace(Partition::Active, &sample(), NOW, before));
        assert_eq!(cache.sizes(), PartitionSizes::default());
    }

    #[test]
    fn active_drifts_to_expired() {
        let cache = SessionCache::new();
        cache.fill(
            Partition::All,
            &[session("a", "1700000005", false)],
            NOW,
            cache.generation(),
        );
        assert!(cache.find_active_by_token("tok-a", NOW).is_some());
        assert!(cache.find_active_by_token("tok-a", "1700000005").is_none());
        assert_eq!(cache.get(Partition::Expired, "1700000005").map(|s| s.len()), Some(1));
    }

    #[test]
    fn lookups_share_the_lock() {
        let cache = SessionCache::new();
        cache.fill(Partition::All, &sample(), NOW, cache.generation());

        let held = cache.read();
        let found = std::thread::scope(|scope| {
            scope
                .spawn(|| cache.find_active_by_token("tok-a", NOW))
                .join()
        });
        drop(held);
        assert!(matches!(found, Ok(Some(ref s)) if s.session_id == "a"));
    }

    #[test]
    fn replace_overwrites_and_evict_removes() {
        let cache = SessionCache::new();
        cache.fill(Partition::All, &sample(), NOW, cache.generation());

        let mut renewed = session("a", "1800000000", false);
        renewed.identity_token = "tok-a2".to_string();
        assert!(cache.replace(Partition::Active, &[renewed], NOW, cache.generation()));
        assert!(cache.find_active_by_token("tok-a", NOW).is_none());
        assert!(cache.find_active_by_token("tok-a2", NOW).is_some());

        cache.evict("a");
        assert!(cache.find_active_by_token("tok-a2", NOW).is_none());
        assert_eq!(cache.sizes().all, 3);
    }
}
