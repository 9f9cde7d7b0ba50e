//! The reclaimer: one elected leader per queue recovers messages parked in
//! the processing lists of consumers whose heartbeat has lapsed.

mod disposition;

pub use disposition::{Collector, Disposition};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::GcConfig;
use crate::consumer::{ConsumerEvent, Signal};
use crate::error::StoreResult;
use crate::heartbeat;
use crate::lock::{LeaderLock, LockAttempt};
use crate::message::now_ms;
use crate::storage::keys::{KeyScope, KeySegments, Keys};
use crate::storage::{Connector, Store};

/// Everything a reclaimer needs besides its connection.
pub(crate) struct Reclaimer {
    pub queue: String,
    /// Id written into the leadership key; the owning consumer's id.
    pub owner: String,
    pub config: GcConfig,
    pub consumer_ttl_ms: u64,
    pub collector: Collector,
    pub events: broadcast::Sender<ConsumerEvent>,
}

impl Reclaimer {
    /// Start the reclaimer on a dedicated connection.
    ///
    /// Once `halt` is raised it releases leadership and sends
    /// [`Signal::GcHalted`]. Any store error ends the task with
    /// [`Signal::Fault`].
    pub(crate) fn spawn(
        self,
        connector: Arc<dyn Connector>,
        halt: watch::Receiver<bool>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let signal = match self.run(connector, halt).await {
                Ok(()) => {
                    info!(queue = %self.queue, owner = %self.owner, "reclaimer halted");
                    Signal::GcHalted
                }
                Err(err) => Signal::Fault(err),
            };
            let _ = signals.send(signal);
        })
    }

    async fn run(&self, connector: Arc<dyn Connector>, mut halt: watch::Receiver<bool>) -> StoreResult<()> {
        let mut store = connector.connect().await?;
        let lock = LeaderLock::new(&self.queue, &self.owner, self.config.lock_tie_break_ttl());

        loop {
            if is_halted(&halt) {
                return Ok(());
            }
            match lock.try_acquire(store.as_mut()).await? {
                LockAttempt::Acquired => break,
                attempt => debug!(queue = %self.queue, ?attempt, "leadership not acquired, retrying"),
            }
            if pause(&mut halt, self.config.lock_retry_interval()).await {
                return Ok(());
            }
        }
        let _ = self.events.send(ConsumerEvent::LeadershipAcquired);

        loop {
            let recovered = self.scan_pass(store.as_mut()).await?;
            if recovered > 0 {
                info!(queue = %self.queue, recovered, "orphaned messages recovered");
            }
            if pause(&mut halt, self.config.scan_interval()).await {
                break;
            }
        }

        lock.release(store.as_mut()).await
    }

    /// One full cursor pass over the queue's processing lists. Returns how
    /// many orphans were disposed of.
    async fn scan_pass(&self, store: &mut dyn Store) -> StoreResult<usize> {
        let pattern = Keys::new(KeyScope::queue(&self.queue)).pattern_processing;
        let mut cursor = 0;
        let mut recovered = 0;
        loop {
            let (next, keys) = store
                .scan(cursor, &pattern, self.config.scan_page_size)
                .await?;
            debug!(queue = %self.queue, found = keys.len(), cursor, "scanned processing lists");
            for key in keys {
                if self.check_processing_list(store, &key).await? {
                    recovered += 1;
                }
            }
            if next == 0 {
                return Ok(recovered);
            }
            cursor = next;
        }
    }

    async fn check_processing_list(&self, store: &mut dyn Store, key: &str) -> StoreResult<bool> {
        let KeySegments::Processing { queue, consumer } = KeySegments::parse(key) else {
            return Ok(false);
        };
        if heartbeat::is_online(store, &queue, &consumer).await? {
            return Ok(false);
        }
        debug!(%key, consumer_id = %consumer, "consumer seems dead, fetching its message");

        let Some(raw) = store.range(key, 0, 0).await?.into_iter().next() else {
            return Ok(false);
        };
        let disposition = self
            .collector
            .collect_raw(store, key, raw, self.consumer_ttl_ms, now_ms(), None)
            .await?;
        let _ = self.events.send(ConsumerEvent::from(disposition));
        Ok(true)
    }
}

fn is_halted(halt: &watch::Receiver<bool>) -> bool {
    *halt.borrow()
}

/// Sleep for `interval` unless halted first. Returns whether halted.
async fn pause(halt: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    if is_halted(halt) {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        changed = halt.changed() => {
            if changed.is_err() {
                return true;
            }
        }
    }
    is_halted(halt)
}
