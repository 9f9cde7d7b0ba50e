use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Value;
use tracing::debug;

use crate::error::StoreResult;
use crate::storage::traits::{Connector, SetOptions, Store, TxOp};

/// Opens one multiplexed connection per [`Connector::connect`] call.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    /// Parse the URL (e.g. `redis://127.0.0.1:6379`). No connection is made
    /// until [`Connector::connect`].
    pub fn open(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> StoreResult<Box<dyn Store>> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("redis connection opened");
        Ok(Box::new(RedisStore { conn }))
    }
}

/// Redis-backed [`Store`]. Dropping it closes the connection.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Store for RedisStore {
    async fn push_front(&mut self, key: &str, value: &str) -> StoreResult<u64> {
        let len: u64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    async fn pop_push_blocking(
        &mut self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> StoreResult<Option<String>> {
        let value: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(source)
            .arg(destination)
            .arg(timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn range(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn)
            .await?;
        Ok(values)
    }

    async fn len(&mut self, key: &str) -> StoreResult<u64> {
        let len: u64 = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(len)
    }

    async fn trim(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        let _: Value = redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn get_many(&mut self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn)
            .await?;
        Ok(values)
    }

    async fn set(&mut self, key: &str, value: &str, options: SetOptions) -> StoreResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if options.only_if_absent {
            cmd.arg("NX");
        }
        if let Some(expiry) = options.expiry {
            cmd.arg("PX").arg(expiry.as_millis().max(1) as u64);
        }
        let reply: Value = cmd.query_async(&mut self.conn).await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn delete(&mut self, key: &str) -> StoreResult<u64> {
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(removed)
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(count > 0)
    }

    async fn scan(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        let page: (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await?;
        Ok(page)
    }

    async fn transaction(&mut self, ops: Vec<TxOp>) -> StoreResult<Vec<i64>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                TxOp::PushFront { key, value } => {
                    pipe.cmd("LPUSH").arg(key).arg(value);
                }
                TxOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                TxOp::Len { key } => {
                    pipe.cmd("LLEN").arg(key);
                }
            }
        }
        let replies: Vec<i64> = pipe.query_async(&mut self.conn).await?;
        Ok(replies)
    }
}
