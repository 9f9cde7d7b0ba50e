//! Queue consumer.
//!
//! A [`Consumer`] is a handle to a worker task that owns three store
//! connections (claim path, heartbeat, reclaimer) and drives the lifecycle
//! in [`state`]. The handle talks to the worker only through its inbox.

mod handler;
pub mod state;
mod worker;

#[cfg(test)]
mod tests;

pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use state::ConsumerStatus;

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ConsumerError, StoreError};
use crate::gc::Disposition;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::storage::keys::is_valid_segment;
use crate::storage::Connector;
use state::{next_status, Input};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Observable lifecycle and per-message outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    Up,
    Down,
    Acknowledged(Message),
    Requeued(Message),
    DeadLettered(Message),
    Expired(Message),
    /// An undecodable entry moved verbatim to the dead-letter list.
    Poisoned(String),
    /// This consumer's reclaimer became the queue's leader.
    LeadershipAcquired,
}

impl From<Disposition> for ConsumerEvent {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Requeued(m) => ConsumerEvent::Requeued(m),
            Disposition::DeadLettered(m) => ConsumerEvent::DeadLettered(m),
            Disposition::Expired(m) => ConsumerEvent::Expired(m),
            Disposition::Poisoned(raw) => ConsumerEvent::Poisoned(raw),
        }
    }
}

/// Messages delivered to the worker's inbox.
#[derive(Debug)]
pub(crate) enum Signal {
    Stop,
    HeartbeatStarted,
    HeartbeatHalted,
    GcHalted,
    Fault(StoreError),
}

/// State shared between the handle and its worker.
pub(crate) struct Shared {
    pub id: String,
    pub queue: String,
    pub config: Config,
    pub connector: Arc<dyn Connector>,
    pub handler: Arc<dyn MessageHandler>,
    pub metrics: Option<Arc<Metrics>>,
    pub events: broadcast::Sender<ConsumerEvent>,
    pub status: watch::Sender<ConsumerStatus>,
}

impl Shared {
    /// Apply a transition and publish the new status. Returns the status
    /// after the input, unchanged when the input had no effect.
    pub fn advance(&self, input: Input) -> ConsumerStatus {
        let current = *self.status.borrow();
        match next_status(current, input) {
            Some(next) => {
                if next != current {
                    self.status.send_replace(next);
                }
                next
            }
            None => current,
        }
    }

    pub fn emit(&self, event: ConsumerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

struct Running {
    inbox: mpsc::UnboundedSender<Signal>,
    worker: JoinHandle<Result<(), ConsumerError>>,
}

/// A consumer of one queue.
pub struct Consumer {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Consumer {
    /// Build a stopped consumer with a fresh random id.
    pub fn new(
        queue: &str,
        config: Config,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConsumerError> {
        if !is_valid_segment(queue) {
            return Err(ConsumerError::InvalidQueueName(queue.to_string()));
        }
        let metrics = config.monitor.enabled.then(|| Arc::new(Metrics::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(ConsumerStatus::Down);
        Ok(Self {
            shared: Arc::new(Shared {
                id: Uuid::new_v4().to_string(),
                queue: queue.to_string(),
                config,
                connector,
                handler,
                metrics,
                events,
                status,
            }),
            running: Mutex::new(None),
        })
    }

    /// Record rate counters on `metrics` regardless of `monitor.enabled`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.metrics = Some(metrics);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn queue(&self) -> &str {
        &self.shared.queue
    }

    pub fn status(&self) -> ConsumerStatus {
        *self.shared.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Lifecycle and per-message events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.shared.events.subscribe()
    }

    /// Follow status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConsumerStatus> {
        self.shared.status.subscribe()
    }

    /// Start consuming. Only effective from [`ConsumerStatus::Down`]; must be
    /// called from within a tokio runtime.
    #[tracing::instrument(skip_all, fields(queue = %self.shared.queue, consumer_id = %self.shared.id))]
    pub fn run(&self) -> Result<(), ConsumerError> {
        let mut running = self.lock_running();
        if self.status() != ConsumerStatus::Down {
            return Err(ConsumerError::AlreadyRunning);
        }
        // A previous run that ended on its own leaves a finished worker.
        running.take();

        self.shared.advance(Input::Run);
        info!("consumer going up");
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = worker::spawn(Arc::clone(&self.shared), tx.clone(), rx);
        *running = Some(Running { inbox: tx, worker });
        Ok(())
    }

    /// Ask the worker to go down. An in-flight message is finished first.
    #[tracing::instrument(skip_all, fields(queue = %self.shared.queue, consumer_id = %self.shared.id))]
    pub fn stop(&self) -> Result<(), ConsumerError> {
        let running = self.lock_running();
        let Some(run) = running.as_ref().filter(|_| self.is_running()) else {
            return Err(ConsumerError::NotRunning);
        };
        info!("consumer stop requested");
        run.inbox
            .send(Signal::Stop)
            .map_err(|_| ConsumerError::NotRunning)
    }

    /// Wait for the worker to finish. Returns [`ConsumerError::Fatal`] when
    /// it was torn down by a store fault.
    pub async fn wait(&self) -> Result<(), ConsumerError> {
        let worker = self.lock_running().take().map(|run| run.worker);
        match worker {
            Some(worker) => match worker.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// [`Consumer::stop`] followed by [`Consumer::wait`].
    pub async fn shutdown(&self) -> Result<(), ConsumerError> {
        match self.stop() {
            Ok(()) | Err(ConsumerError::NotRunning) => self.wait().await,
            Err(err) => Err(err),
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if let Some(run) = self.lock_running().as_ref() {
            let _ = run.inbox.send(Signal::Stop);
        }
    }
}
