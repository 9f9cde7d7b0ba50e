use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ProducerError;
use crate::lock::ProducerLock;
use crate::message::Message;
use crate::metrics::Metrics;
use crate::storage::keys::{is_valid_segment, KeyScope, Keys};
use crate::storage::{Connector, Store};

/// Enqueues messages onto one queue over its own connection.
pub struct Producer {
    id: String,
    queue: String,
    queue_key: String,
    store: Box<dyn Store>,
    lock: ProducerLock,
    metrics: Option<Arc<Metrics>>,
}

impl Producer {
    pub async fn connect(
        queue: &str,
        config: &Config,
        connector: &dyn Connector,
    ) -> Result<Self, ProducerError> {
        if !is_valid_segment(queue) {
            return Err(ProducerError::InvalidQueueName(queue.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let keys = Keys::new(KeyScope::producer(queue, &id));
        let store = connector.connect().await?;
        Ok(Self {
            lock: ProducerLock::new(queue, &id, config.producer.lock_ttl()),
            queue_key: keys.queue.unwrap_or_default(),
            queue: queue.to_string(),
            id,
            store,
            metrics: config.monitor.enabled.then(|| Arc::new(Metrics::new())),
        })
    }

    /// Record the input counter on `metrics` regardless of `monitor.enabled`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Enqueue `payload` with no message-level TTL.
    pub async fn produce<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
    ) -> Result<Message, ProducerError> {
        self.enqueue(payload, 0).await
    }

    /// Enqueue `payload`, dropped unprocessed once `ttl` has elapsed.
    pub async fn produce_with_ttl<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        ttl: Duration,
    ) -> Result<Message, ProducerError> {
        self.enqueue(payload, ttl.as_millis() as u64).await
    }

    #[tracing::instrument(skip_all, fields(queue = %self.queue, producer_id = %self.id))]
    async fn enqueue<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        ttl_ms: u64,
    ) -> Result<Message, ProducerError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| ProducerError::Serialization(e.to_string()))?;
        let message = Message::new(data, ttl_ms);
        let encoded = message
            .encode()
            .map_err(|e| ProducerError::Serialization(e.to_string()))?;

        self.store.push_front(&self.queue_key, &encoded).await?;
        debug!(msg_id = %message.uuid, "message produced");
        if let Some(m) = &self.metrics {
            m.record_input(&self.queue);
        }
        Ok(message)
    }

    /// Try to take or renew exclusive production rights for this queue.
    /// `false` means another producer holds them; call again later.
    #[tracing::instrument(skip_all, fields(queue = %self.queue, producer_id = %self.id))]
    pub async fn acquire_lock(&mut self) -> Result<bool, ProducerError> {
        let attempt = self.lock.try_acquire(self.store.as_mut()).await?;
        debug!(?attempt, "producer lock attempt");
        Ok(attempt.is_acquired())
    }
}
