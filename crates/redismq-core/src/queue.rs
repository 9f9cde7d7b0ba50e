//! Read-only views over the keyspace, plus the dead-letter reader.

use tracing::debug;

use crate::error::StoreResult;
use crate::message::Message;
use crate::storage::keys::{KeyScope, KeySegments, Keys};
use crate::storage::{scan_all, Store, TxOp};

const INSPECT_SCAN_PAGE_SIZE: usize = 1000;

/// Length of one queue list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSummary {
    pub name: String,
    pub size: u64,
}

/// One dead-letter list entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetter {
    Message(Message),
    /// An entry that is not a valid message.
    Raw(String),
}

/// Main-queue keys currently present.
pub async fn list_queues(store: &mut dyn Store) -> StoreResult<Vec<String>> {
    let pattern = Keys::new(KeyScope::fleet()).pattern_queue;
    scan_all(store, &pattern, INSPECT_SCAN_PAGE_SIZE).await
}

/// Dead-letter keys currently present.
pub async fn list_dead_letter_queues(store: &mut dyn Store) -> StoreResult<Vec<String>> {
    let pattern = Keys::new(KeyScope::fleet()).pattern_dead;
    scan_all(store, &pattern, INSPECT_SCAN_PAGE_SIZE).await
}

/// Sizes of the given queue keys, read in one transaction.
pub async fn queue_sizes(store: &mut dyn Store, keys: &[String]) -> StoreResult<Vec<QueueSummary>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let ops = keys
        .iter()
        .map(|key| TxOp::Len { key: key.clone() })
        .collect();
    let sizes = store.transaction(ops).await?;
    Ok(keys
        .iter()
        .zip(sizes)
        .map(|(key, size)| QueueSummary {
            name: KeySegments::parse(key)
                .queue()
                .map_or_else(|| key.clone(), str::to_string),
            size: size.max(0) as u64,
        })
        .collect())
}

/// Read the whole dead-letter list of `queue`, oldest first.
///
/// With `flush`, exactly the entries returned are removed; entries
/// dead-lettered in the meantime stay.
#[tracing::instrument(skip(store))]
pub async fn read_dead_letters(
    store: &mut dyn Store,
    queue: &str,
    flush: bool,
) -> StoreResult<Vec<DeadLetter>> {
    let key = Keys::new(KeyScope::queue(queue)).dead.unwrap_or_default();
    let mut entries = store.range(&key, 0, -1).await?;
    debug!(%key, found = entries.len(), "dead letters read");

    if flush && !entries.is_empty() {
        // New entries land at the head; the ones just read form the tail.
        let read = entries.len() as i64;
        store.trim(&key, 0, -read - 1).await?;
    }

    entries.reverse();
    Ok(entries
        .into_iter()
        .map(|raw| match Message::decode(&raw) {
            Ok(message) => DeadLetter::Message(message),
            Err(_) => DeadLetter::Raw(raw),
        })
        .collect())
}
