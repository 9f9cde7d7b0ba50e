use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::message::{Message, MessageError};
use crate::metrics::Metrics;
use crate::storage::keys::{KeyScope, Keys};
use crate::storage::{Store, TxOp};

/// Where a failed, expired or orphaned message ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Requeued(Message),
    DeadLettered(Message),
    Expired(Message),
    /// An entry that was not a message; moved verbatim to the dead-letter list.
    Poisoned(String),
}

/// Applies the retry/dead-letter/expiry rule to the single entry of a
/// processing list. Shared by the consumer's failure path and the
/// reclaimer so both always decide the same way.
#[derive(Clone)]
pub struct Collector {
    queue: String,
    main_key: String,
    dead_key: String,
    retry_threshold: u32,
    metrics: Option<Arc<Metrics>>,
}

impl Collector {
    pub fn new(queue: &str, retry_threshold: u32, metrics: Option<Arc<Metrics>>) -> Self {
        let keys = Keys::new(KeyScope::queue(queue));
        Self {
            queue: queue.to_string(),
            main_key: keys.queue.unwrap_or_default(),
            dead_key: keys.dead.unwrap_or_default(),
            retry_threshold,
            metrics,
        }
    }

    /// Count a failed attempt and move the message out of `processing_key`:
    /// back onto the main queue, or to the dead-letter list once attempts
    /// exceed the threshold. Push and delete run in one transaction.
    pub async fn collect_message(
        &self,
        store: &mut dyn Store,
        processing_key: &str,
        mut message: Message,
        error: Option<MessageError>,
    ) -> StoreResult<Disposition> {
        message.attempts = message.attempts.saturating_add(1);
        message.error = error;
        let dead = message.attempts > self.retry_threshold;
        let destination = if dead { &self.dead_key } else { &self.main_key };

        store
            .transaction(vec![
                TxOp::PushFront {
                    key: destination.clone(),
                    value: message.encode()?,
                },
                TxOp::Delete {
                    key: processing_key.to_string(),
                },
            ])
            .await?;

        if dead {
            warn!(queue = %self.queue, msg_id = %message.uuid, attempts = message.attempts, "message dead-lettered");
            if let Some(m) = &self.metrics {
                m.record_dead_lettered(&self.queue);
            }
            Ok(Disposition::DeadLettered(message))
        } else {
            debug!(queue = %self.queue, msg_id = %message.uuid, attempts = message.attempts, "message requeued");
            if let Some(m) = &self.metrics {
                m.record_requeued(&self.queue);
            }
            Ok(Disposition::Requeued(message))
        }
    }

    /// Drop an expired message without redelivery.
    pub async fn collect_expired_message(
        &self,
        store: &mut dyn Store,
        processing_key: &str,
        message: Message,
    ) -> StoreResult<Disposition> {
        store.delete(processing_key).await?;
        debug!(queue = %self.queue, msg_id = %message.uuid, "expired message dropped");
        if let Some(m) = &self.metrics {
            m.record_expired(&self.queue);
        }
        Ok(Disposition::Expired(message))
    }

    /// Move an undecodable entry to the dead-letter list as-is.
    pub async fn collect_poison(
        &self,
        store: &mut dyn Store,
        processing_key: &str,
        raw: String,
    ) -> StoreResult<Disposition> {
        store
            .transaction(vec![
                TxOp::PushFront {
                    key: self.dead_key.clone(),
                    value: raw.clone(),
                },
                TxOp::Delete {
                    key: processing_key.to_string(),
                },
            ])
            .await?;
        warn!(queue = %self.queue, key = %processing_key, "undecodable entry dead-lettered");
        if let Some(m) = &self.metrics {
            m.record_dead_lettered(&self.queue);
        }
        Ok(Disposition::Poisoned(raw))
    }

    /// Decode `raw` and route it: poison, expired, or a failed attempt.
    pub async fn collect_raw(
        &self,
        store: &mut dyn Store,
        processing_key: &str,
        raw: String,
        consumer_ttl_ms: u64,
        now_ms: u64,
        error: Option<MessageError>,
    ) -> StoreResult<Disposition> {
        match Message::decode(&raw) {
            Err(_) => self.collect_poison(store, processing_key, raw).await,
            Ok(message) if message.is_expired(now_ms, consumer_ttl_ms) => {
                self.collect_expired_message(store, processing_key, message)
                    .await
            }
            Ok(message) => {
                self.collect_message(store, processing_key, message, error)
                    .await
            }
        }
    }
}
