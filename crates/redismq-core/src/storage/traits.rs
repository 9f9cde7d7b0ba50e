use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Options for [`Store::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Only write if the key does not exist (NX).
    pub only_if_absent: bool,
    /// Expire the key after this long (PX).
    pub expiry: Option<Duration>,
}

impl SetOptions {
    pub fn expiring(expiry: Duration) -> Self {
        Self {
            only_if_absent: false,
            expiry: Some(expiry),
        }
    }

    pub fn absent_expiring(expiry: Duration) -> Self {
        Self {
            only_if_absent: true,
            expiry: Some(expiry),
        }
    }
}

/// A single command queued into an atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    PushFront { key: String, value: String },
    Delete { key: String },
    Len { key: String },
}

/// One exclusively-owned connection to the shared keyspace.
///
/// Components never share a `Store`: each opens its own through a
/// [`Connector`] so that closing one (by dropping it) cannot stall another.
#[async_trait]
pub trait Store: Send {
    /// Push onto the head of a list. Returns the new list length.
    async fn push_front(&mut self, key: &str, value: &str) -> StoreResult<u64>;

    /// Atomically pop the tail of `source` and push it onto the head of
    /// `destination`, waiting up to `timeout` for `source` to become
    /// non-empty. A zero timeout waits forever.
    async fn pop_push_blocking(
        &mut self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>>;

    /// List elements between `start` and `stop` inclusive; negative indexes
    /// count from the tail.
    async fn range(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    async fn len(&mut self, key: &str) -> StoreResult<u64>;

    /// Keep only the elements between `start` and `stop` inclusive.
    async fn trim(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<()>;

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    async fn get_many(&mut self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Set a string value. Returns `false` when `only_if_absent` was requested
    /// and the key already existed.
    async fn set(&mut self, key: &str, value: &str, options: SetOptions) -> StoreResult<bool>;

    /// Delete a key of any type. Returns the number of keys removed.
    async fn delete(&mut self, key: &str) -> StoreResult<u64>;

    async fn exists(&mut self, key: &str) -> StoreResult<bool>;

    /// One page of an incremental key scan. Returns the next cursor, which
    /// is `0` once the pass is complete.
    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)>;

    /// Execute all ops atomically. Returns one integer reply per op.
    async fn transaction(&mut self, ops: Vec<TxOp>) -> StoreResult<Vec<i64>>;
}

/// Opens fresh store connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> StoreResult<Box<dyn Store>>;
}

/// Collect every key matching `pattern` with a full cursor pass.
pub async fn scan_all(
    store: &mut dyn Store,
    pattern: &str,
    count: usize,
) -> StoreResult<Vec<String>> {
    let mut cursor = 0;
    let mut out = Vec::new();
    loop {
        let (next, keys) = store.scan(cursor, pattern, count).await?;
        out.extend(keys);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    // SCAN may return a key more than once within a pass.
    out.sort();
    out.dedup();
    Ok(out)
}
