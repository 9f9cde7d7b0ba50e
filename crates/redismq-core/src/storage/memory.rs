use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{StoreError, StoreResult};
use crate::storage::traits::{Connector, SetOptions, Store, TxOp};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Keyspace {
    entries: BTreeMap<String, Entry>,
    /// Open scan cursors, each mapped to the last key its page returned.
    cursors: HashMap<u64, String>,
    last_cursor: u64,
}

impl Keyspace {
    fn purge_expired(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now));
    }

    fn list_mut(&mut self, key: &str) -> StoreResult<Option<&mut VecDeque<String>>> {
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list(&self, key: &str) -> StoreResult<Option<&VecDeque<String>>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn push_front(&mut self, key: &str, value: &str) -> StoreResult<u64> {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_string());
                Ok(list.len() as u64)
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    fn pop_back(&mut self, key: &str) -> StoreResult<Option<String>> {
        let Some(list) = self.list_mut(key)? else {
            return Ok(None);
        };
        let value = list.pop_back();
        if list.is_empty() {
            self.entries.remove(key);
        }
        Ok(value)
    }

    fn delete(&mut self, key: &str) -> u64 {
        u64::from(self.entries.remove(key).is_some())
    }

    fn len(&self, key: &str) -> StoreResult<u64> {
        Ok(self.list(key)?.map_or(0, |l| l.len() as u64))
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against a key holding the wrong kind of value: {key}"
    ))
}

/// Resolve redis-style inclusive, possibly negative, list bounds.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Glob matching with `*` (any run) and `?` (any single char).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

struct Shared {
    keyspace: Mutex<Keyspace>,
    written: Notify,
    offline: AtomicBool,
    conditional_set_delay: Mutex<Option<Duration>>,
}

/// In-process keyspace shared by every connection opened from one connector.
///
/// Behaves like a single Redis server for the commands in [`Store`]:
/// expiring keys, glob scans, blocking pop-push, atomic transactions.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                keyspace: Mutex::new(Keyspace::default()),
                written: Notify::new(),
                offline: AtomicBool::new(false),
                conditional_set_delay: Mutex::new(None),
            }),
        }
    }

    /// Sleep this long before every set-if-absent, widening the window in
    /// which racing contenders all observe an unheld key.
    pub fn with_conditional_set_delay(self, delay: Duration) -> Self {
        *lock(&self.shared.conditional_set_delay) = Some(delay);
        self
    }

    /// While offline, every command on every connection fails with
    /// [`StoreError::Connection`] and blocked pops are woken to fail.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
        self.shared.written.notify_waiters();
    }

    /// Snapshot of all live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut ks = lock(&self.shared.keyspace);
        ks.purge_expired(Instant::now());
        ks.entries.keys().cloned().collect()
    }

    /// Snapshot of a list, head first. Empty when the key is absent.
    pub fn list(&self, key: &str) -> Vec<String> {
        let mut ks = lock(&self.shared.keyspace);
        ks.purge_expired(Instant::now());
        match ks.entries.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Current string value of a key.
    pub fn value(&self, key: &str) -> Option<String> {
        let mut ks = lock(&self.shared.keyspace);
        ks.purge_expired(Instant::now());
        match ks.entries.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> StoreResult<Box<dyn Store>> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        Ok(Box::new(MemoryStore {
            shared: Arc::clone(&self.shared),
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One connection to a [`MemoryConnector`] keyspace.
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Run `f` against the keyspace after the liveness and expiry checks
    /// every command goes through.
    fn with_keyspace<T>(&self, f: impl FnOnce(&mut Keyspace) -> StoreResult<T>) -> StoreResult<T> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        let mut ks = lock(&self.shared.keyspace);
        ks.purge_expired(Instant::now());
        f(&mut ks)
    }

    fn notify_writers(&self) {
        self.shared.written.notify_waiters();
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push_front(&mut self, key: &str, value: &str) -> StoreResult<u64> {
        let len = self.with_keyspace(|ks| ks.push_front(key, value))?;
        self.notify_writers();
        Ok(len)
    }

    async fn pop_push_blocking(
        &mut self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        let deadline = (!timeout.is_zero()).then(|| tokio::time::Instant::now() + timeout);
        loop {
            let notified = self.shared.written.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let moved = self.with_keyspace(|ks| {
                // Check the destination type before popping so a failure
                // leaves the source untouched.
                ks.list(destination)?;
                match ks.pop_back(source)? {
                    Some(value) => {
                        ks.push_front(destination, &value)?;
                        Ok(Some(value))
                    }
                    None => Ok(None),
                }
            })?;
            if let Some(value) = moved {
                self.notify_writers();
                return Ok(Some(value));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn range(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.with_keyspace(|ks| {
            let Some(list) = ks.list(key)? else {
                return Ok(Vec::new());
            };
            Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            })
        })
    }

    async fn len(&mut self, key: &str) -> StoreResult<u64> {
        self.with_keyspace(|ks| ks.len(key))
    }

    async fn trim(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        self.with_keyspace(|ks| {
            let Some(list) = ks.list_mut(key)? else {
                return Ok(());
            };
            match resolve_range(list.len(), start, stop) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            }
            if list.is_empty() {
                ks.entries.remove(key);
            }
            Ok(())
        })
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.with_keyspace(|ks| match ks.entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn get_many(&mut self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.with_keyspace(|ks| {
            Ok(keys
                .iter()
                .map(|k| match ks.entries.get(k) {
                    Some(Entry {
                        value: Value::Str(s),
                        ..
                    }) => Some(s.clone()),
                    _ => None,
                })
                .collect())
        })
    }

    async fn set(&mut self, key: &str, value: &str, options: SetOptions) -> StoreResult<bool> {
        if options.only_if_absent {
            let delay = *lock(&self.shared.conditional_set_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        let written = self.with_keyspace(|ks| {
            if options.only_if_absent && ks.entries.contains_key(key) {
                return Ok(false);
            }
            ks.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: options.expiry.map(|d| Instant::now() + d),
                },
            );
            Ok(true)
        })?;
        if written {
            self.notify_writers();
        }
        Ok(written)
    }

    async fn delete(&mut self, key: &str) -> StoreResult<u64> {
        self.with_keyspace(|ks| Ok(ks.delete(key)))
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        self.with_keyspace(|ks| Ok(ks.entries.contains_key(key)))
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        // A cursor resumes after the last key its page returned, so deletes
        // between pages never shift a live key past the pass.
        self.with_keyspace(|ks| {
            let after = match cursor {
                0 => Bound::Unbounded,
                id => match ks.cursors.remove(&id) {
                    Some(last) => Bound::Excluded(last),
                    None => return Ok((0, Vec::new())),
                },
            };
            let count = count.max(1);
            let mut window = ks
                .entries
                .range::<String, _>((after, Bound::Unbounded))
                .map(|(k, _)| k);
            let page: Vec<String> = window.by_ref().take(count).cloned().collect();
            let more = window.next().is_some();

            let next = match page.last() {
                Some(last) if more => {
                    ks.last_cursor += 1;
                    ks.cursors.insert(ks.last_cursor, last.clone());
                    ks.last_cursor
                }
                _ => 0,
            };
            let keys = page
                .into_iter()
                .filter(|k| glob_match(pattern, k))
                .collect();
            Ok((next, keys))
        })
    }

    async fn transaction(&mut self, ops: Vec<TxOp>) -> StoreResult<Vec<i64>> {
        let replies = self.with_keyspace(|ks| {
            // Type-check first so a failing op leaves nothing half-applied.
            for op in &ops {
                match op {
                    TxOp::PushFront { key, .. } | TxOp::Len { key } => {
                        ks.list(key)?;
                    }
                    TxOp::Delete { .. } => {}
                }
            }
            let mut replies = Vec::with_capacity(ops.len());
            for op in &ops {
                let reply = match op {
                    TxOp::PushFront { key, value } => ks.push_front(key, value)? as i64,
                    TxOp::Delete { key } => ks.delete(key) as i64,
                    TxOp::Len { key } => ks.len(key)? as i64,
                };
                replies.push(reply);
            }
            Ok(replies)
        })?;
        self.notify_writers();
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::scan_all;

    async fn store() -> (MemoryConnector, Box<dyn Store>) {
        let connector = MemoryConnector::new();
        let store = connector.connect().await.unwrap();
        (connector, store)
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("redismq:processing:*", "redismq:processing:q:c1"));
        assert!(glob_match("redismq:processing:q:*", "redismq:processing:q:c1"));
        assert!(!glob_match("redismq:processing:q:*", "redismq:processing:r:c1"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
    }

    #[test]
    fn range_bounds_follow_redis() {
        assert_eq!(resolve_range(3, 0, -1), Some((0, 2)));
        assert_eq!(resolve_range(3, 0, 0), Some((0, 0)));
        assert_eq!(resolve_range(3, -2, -1), Some((1, 2)));
        assert_eq!(resolve_range(3, 0, 10), Some((0, 2)));
        assert_eq!(resolve_range(3, 5, 10), None);
        assert_eq!(resolve_range(0, 0, -1), None);
    }

    #[tokio::test]
    async fn lists_push_range_trim() {
        let (connector, mut store) = store().await;
        store.push_front("l", "a").await.unwrap();
        store.push_front("l", "b").await.unwrap();
        assert_eq!(store.push_front("l", "c").await.unwrap(), 3);
        assert_eq!(store.range("l", 0, -1).await.unwrap(), vec!["c", "b", "a"]);
        assert_eq!(store.len("l").await.unwrap(), 3);

        store.trim("l", 1, -1).await.unwrap();
        assert_eq!(connector.list("l"), vec!["b", "a"]);

        store.trim("l", 5, -1).await.unwrap();
        assert!(!store.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn set_if_absent_and_expiry() {
        let (_connector, mut store) = store().await;
        assert!(store
            .set("k", "one", SetOptions::absent_expiring(Duration::from_millis(30)))
            .await
            .unwrap());
        assert!(!store
            .set("k", "two", SetOptions::absent_expiring(Duration::from_millis(30)))
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("one"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.set("k", "three", SetOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_type_is_a_command_error() {
        let (_connector, mut store) = store().await;
        store.set("s", "v", SetOptions::default()).await.unwrap();
        let err = store.push_front("s", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::Command(_)));
    }

    #[tokio::test]
    async fn blocking_pop_push_waits_for_writer() {
        let connector = MemoryConnector::new();
        let mut waiter = connector.connect().await.unwrap();
        let mut writer = connector.connect().await.unwrap();

        let claim = tokio::spawn(async move {
            waiter
                .pop_push_blocking("src", "dst", Duration::ZERO)
                .await
                .unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.push_front("src", "first").await.unwrap();

        let moved = tokio::time::timeout(Duration::from_secs(2), claim)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.as_deref(), Some("first"));
        assert!(connector.list("src").is_empty());
        assert_eq!(connector.list("dst"), vec!["first"]);
    }

    #[tokio::test]
    async fn blocking_pop_push_pops_tail() {
        let (connector, mut store) = store().await;
        store.push_front("src", "old").await.unwrap();
        store.push_front("src", "new").await.unwrap();
        let moved = store
            .pop_push_blocking("src", "dst", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(moved.as_deref(), Some("old"));
        assert_eq!(connector.list("src"), vec!["new"]);
    }

    #[tokio::test]
    async fn blocking_pop_push_times_out() {
        let (_connector, mut store) = store().await;
        let moved = store
            .pop_push_blocking("empty", "dst", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(moved.is_none());
    }

    #[tokio::test]
    async fn scan_paginates_with_pattern() {
        let (_connector, mut store) = store().await;
        for i in 0..25 {
            store
                .push_front(&format!("redismq:processing:q:{i:02}"), "m")
                .await
                .unwrap();
        }
        store.push_front("redismq:queue:q", "m").await.unwrap();

        let (cursor, first) = store.scan(0, "redismq:processing:*", 10).await.unwrap();
        assert_ne!(cursor, 0);
        assert!(first.len() <= 10);

        let all = scan_all(store.as_mut(), "redismq:processing:*", 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 25);
        assert!(all.iter().all(|k| k.starts_with("redismq:processing:")));
    }

    #[tokio::test]
    async fn scan_pass_survives_deletes_between_pages() {
        let (_connector, mut store) = store().await;
        for id in ["a", "b", "c", "d"] {
            store
                .push_front(&format!("redismq:processing:q:{id}"), "m")
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, keys) = store.scan(cursor, "redismq:processing:*", 2).await.unwrap();
            for key in keys {
                store.delete(&key).await.unwrap();
                seen.push(key);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(
            seen,
            vec![
                "redismq:processing:q:a",
                "redismq:processing:q:b",
                "redismq:processing:q:c",
                "redismq:processing:q:d",
            ]
        );
    }

    #[tokio::test]
    async fn scan_with_unknown_cursor_ends_the_pass() {
        let (_connector, mut store) = store().await;
        store.push_front("redismq:queue:q", "m").await.unwrap();
        let (next, keys) = store.scan(42, "*", 10).await.unwrap();
        assert_eq!(next, 0);
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn transaction_applies_all_ops() {
        let (connector, mut store) = store().await;
        store.push_front("processing", "m").await.unwrap();
        let replies = store
            .transaction(vec![
                TxOp::PushFront {
                    key: "main".to_string(),
                    value: "m".to_string(),
                },
                TxOp::Delete {
                    key: "processing".to_string(),
                },
                TxOp::Len {
                    key: "main".to_string(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![1, 1, 1]);
        assert_eq!(connector.list("main"), vec!["m"]);
        assert!(connector.list("processing").is_empty());
    }

    #[tokio::test]
    async fn transaction_type_error_applies_nothing() {
        let (connector, mut store) = store().await;
        store.set("s", "v", SetOptions::default()).await.unwrap();
        store.push_front("processing", "m").await.unwrap();
        let result = store
            .transaction(vec![
                TxOp::Delete {
                    key: "processing".to_string(),
                },
                TxOp::PushFront {
                    key: "s".to_string(),
                    value: "m".to_string(),
                },
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(connector.list("processing"), vec!["m"]);
    }

    #[tokio::test]
    async fn offline_store_fails_commands() {
        let (connector, mut store) = store().await;
        connector.set_offline(true);
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(connector.connect().await.is_err());

        connector.set_offline(false);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_wakes_blocked_pop() {
        let connector = MemoryConnector::new();
        let mut waiter = connector.connect().await.unwrap();
        let claim = tokio::spawn(async move {
            waiter
                .pop_push_blocking("src", "dst", Duration::ZERO)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        connector.set_offline(true);
        let result = tokio::time::timeout(Duration::from_secs(2), claim)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }
}
