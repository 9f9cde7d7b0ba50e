//! Mutual exclusion built from set-if-absent.
//!
//! Neither lock can be taken in one atomic step: "is it free, or is its
//! holder dead" is a read followed by a write. Racing contenders are
//! serialised by a short-lived tie-break key set with NX; only the winner
//! of the tie-break writes the real lock.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::StoreResult;
use crate::heartbeat;
use crate::storage::keys::{KeyScope, Keys};
use crate::storage::{SetOptions, Store};

/// Outcome of a single acquisition attempt. Contention is a value, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// The lock now names us (or already did).
    Acquired,
    /// A live holder owns it.
    Held,
    /// Another contender won the tie-break.
    LostRace,
}

impl LockAttempt {
    pub fn is_acquired(self) -> bool {
        self == LockAttempt::Acquired
    }
}

/// Reclaimer leadership for one queue.
///
/// The lock key carries no TTL; it is held until [`LeaderLock::release`].
/// A holder that died without releasing is detected through its heartbeat.
#[derive(Debug, Clone)]
pub struct LeaderLock {
    queue: String,
    owner: String,
    lock_key: String,
    tmp_key: String,
    tie_break_ttl: Duration,
}

impl LeaderLock {
    pub fn new(queue: &str, owner: &str, tie_break_ttl: Duration) -> Self {
        let keys = Keys::new(KeyScope::queue(queue));
        Self {
            queue: queue.to_string(),
            owner: owner.to_string(),
            lock_key: keys.gc_lock.unwrap_or_default(),
            tmp_key: keys.gc_lock_tmp.unwrap_or_default(),
            tie_break_ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[tracing::instrument(skip_all, fields(queue = %self.queue, owner = %self.owner))]
    pub async fn try_acquire(&self, store: &mut dyn Store) -> StoreResult<LockAttempt> {
        match store.get(&self.lock_key).await? {
            Some(holder) if holder == self.owner => return Ok(LockAttempt::Acquired),
            Some(holder) => {
                if heartbeat::is_online(store, &self.queue, &holder).await? {
                    debug!(%holder, "leader is alive");
                    return Ok(LockAttempt::Held);
                }
                debug!(%holder, "leader looks dead, contesting");
            }
            None => {}
        }

        let won = store
            .set(
                &self.tmp_key,
                &self.owner,
                SetOptions::absent_expiring(self.tie_break_ttl),
            )
            .await?;
        if !won {
            return Ok(LockAttempt::LostRace);
        }
        store
            .set(&self.lock_key, &self.owner, SetOptions::default())
            .await?;
        info!("leadership acquired");
        Ok(LockAttempt::Acquired)
    }

    /// Give up leadership. Keys that name another owner are left alone.
    pub async fn release(&self, store: &mut dyn Store) -> StoreResult<()> {
        if store.get(&self.lock_key).await?.as_deref() == Some(self.owner.as_str()) {
            store.delete(&self.lock_key).await?;
        }
        if store.get(&self.tmp_key).await?.as_deref() == Some(self.owner.as_str()) {
            store.delete(&self.tmp_key).await?;
        }
        info!(queue = %self.queue, owner = %self.owner, "leadership released");
        Ok(())
    }
}

/// Exclusive production rights among redundant producers of one queue.
/// Held for `ttl` and kept by calling [`ProducerLock::try_acquire`] again
/// before it lapses.
#[derive(Debug, Clone)]
pub struct ProducerLock {
    owner: String,
    lock_key: String,
    tmp_key: String,
    ttl: Duration,
}

impl ProducerLock {
    pub fn new(queue: &str, owner: &str, ttl: Duration) -> Self {
        let keys = Keys::new(KeyScope::producer(queue, owner));
        Self {
            owner: owner.to_string(),
            lock_key: keys.producer_lock.unwrap_or_default(),
            tmp_key: keys.producer_lock_tmp.unwrap_or_default(),
            ttl,
        }
    }

    pub async fn try_acquire(&self, store: &mut dyn Store) -> StoreResult<LockAttempt> {
        match store.get(&self.lock_key).await? {
            Some(holder) if holder == self.owner => {
                store
                    .set(&self.lock_key, &self.owner, SetOptions::expiring(self.ttl))
                    .await?;
                Ok(LockAttempt::Acquired)
            }
            Some(_) => Ok(LockAttempt::Held),
            None => {
                let won = store
                    .set(&self.tmp_key, &self.owner, SetOptions::absent_expiring(self.ttl))
                    .await?;
                if !won {
                    return Ok(LockAttempt::LostRace);
                }
                store
                    .set(&self.lock_key, &self.owner, SetOptions::expiring(self.ttl))
                    .await?;
                Ok(LockAttempt::Acquired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::{Connector, MemoryConnector};

    const TIE_BREAK: Duration = Duration::from_secs(60);

    async fn beat(store: &mut dyn Store, queue: &str, consumer: &str) {
        store
            .set(
                &Keys::heartbeat_of(queue, consumer),
                "{}",
                SetOptions::expiring(Duration::from_secs(10)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn free_lock_is_acquired_and_reentrant() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        let lock = LeaderLock::new("orders", "c1", TIE_BREAK);

        assert_eq!(
            lock.try_acquire(store.as_mut()).await.unwrap(),
            LockAttempt::Acquired
        );
        assert_eq!(connector.value("redismq:gc:orders:lock").as_deref(), Some("c1"));
        assert_eq!(
            lock.try_acquire(store.as_mut()).await.unwrap(),
            LockAttempt::Acquired
        );
    }

    #[tokio::test]
    async fn live_holder_keeps_lock() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        beat(store.as_mut(), "orders", "c1").await;
        LeaderLock::new("orders", "c1", TIE_BREAK)
            .try_acquire(store.as_mut())
            .await
            .unwrap();

        let other = LeaderLock::new("orders", "c2", TIE_BREAK);
        assert_eq!(
            other.try_acquire(store.as_mut()).await.unwrap(),
            LockAttempt::Held
        );
    }

    #[tokio::test]
    async fn dead_holder_is_replaced() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        store
            .set("redismq:gc:orders:lock", "ghost", SetOptions::default())
            .await
            .unwrap();

        let lock = LeaderLock::new("orders", "c2", TIE_BREAK);
        assert_eq!(
            lock.try_acquire(store.as_mut()).await.unwrap(),
            LockAttempt::Acquired
        );
        assert_eq!(connector.value("redismq:gc:orders:lock").as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn held_tie_break_loses_race() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        store
            .set(
                "redismq:gc:orders:lock:tmp",
                "c1",
                SetOptions::absent_expiring(TIE_BREAK),
            )
            .await
            .unwrap();

        let lock = LeaderLock::new("orders", "c2", TIE_BREAK);
        assert_eq!(
            lock.try_acquire(store.as_mut()).await.unwrap(),
            LockAttempt::LostRace
        );
    }

    #[tokio::test]
    async fn racing_contenders_elect_exactly_one() {
        let connector =
            MemoryConnector::new().with_conditional_set_delay(Duration::from_millis(20));
        let connector: Arc<dyn Connector> = Arc::new(connector);

        let mut contenders = Vec::new();
        for i in 0..8 {
            let connector = Arc::clone(&connector);
            contenders.push(tokio::spawn(async move {
                let mut store = connector.connect().await.unwrap();
                LeaderLock::new("orders", &format!("c{i}"), TIE_BREAK)
                    .try_acquire(store.as_mut())
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for contender in contenders {
            if contender.await.unwrap().is_acquired() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn release_only_drops_own_keys() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        let lock = LeaderLock::new("orders", "c1", TIE_BREAK);
        lock.try_acquire(store.as_mut()).await.unwrap();
        lock.release(store.as_mut()).await.unwrap();
        assert!(connector.value("redismq:gc:orders:lock").is_none());
        assert!(connector.value("redismq:gc:orders:lock:tmp").is_none());

        store
            .set("redismq:gc:orders:lock", "c9", SetOptions::default())
            .await
            .unwrap();
        lock.release(store.as_mut()).await.unwrap();
        assert_eq!(connector.value("redismq:gc:orders:lock").as_deref(), Some("c9"));
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        connector.set_offline(true);
        assert!(LeaderLock::new("orders", "c1", TIE_BREAK)
            .try_acquire(store.as_mut())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn producer_lock_is_exclusive_and_renewable() {
        let connector = MemoryConnector::new();
        let mut store = connector.connect().await.unwrap();
        let ttl = Duration::from_millis(200);
        let p1 = ProducerLock::new("orders", "p1", ttl);
        let p2 = ProducerLock::new("orders", "p2", ttl);

        assert_eq!(p1.try_acquire(store.as_mut()).await.unwrap(), LockAttempt::Acquired);
        assert_eq!(p2.try_acquire(store.as_mut()).await.unwrap(), LockAttempt::Held);

        // Renewal keeps it past the first expiry.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(p1.try_acquire(store.as_mut()).await.unwrap(), LockAttempt::Acquired);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(p2.try_acquire(store.as_mut()).await.unwrap(), LockAttempt::Held);

        // Once p1 stops renewing, both keys lapse and p2 takes over.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(p2.try_acquire(store.as_mut()).await.unwrap(), LockAttempt::Acquired);
        assert_eq!(
            connector.value("redismq:producer:orders:lock").as_deref(),
            Some("p2")
        );
    }
}
