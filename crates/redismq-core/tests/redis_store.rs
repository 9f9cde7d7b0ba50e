//! Exercises the Redis store against a live server. Set
//! `REDISMQ_TEST_REDIS_URL` (e.g. `redis://127.0.0.1:6379/15`) to run;
//! without it every test returns immediately.

use std::sync::Arc;
use std::time::Duration;

use redismq_core::config::Config;
use redismq_core::storage::{scan_all, Connector, RedisConnector, SetOptions, TxOp};
use redismq_core::{handler_fn, Consumer, ConsumerEvent, Producer};
use uuid::Uuid;

fn connector() -> Option<RedisConnector> {
    let url = std::env::var("REDISMQ_TEST_REDIS_URL").ok()?;
    Some(RedisConnector::open(&url).expect("invalid REDISMQ_TEST_REDIS_URL"))
}

fn unique(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn list_and_string_commands() {
    let Some(connector) = connector() else { return };
    let mut store = connector.connect().await.unwrap();
    let list = unique("redismq:test:list:");
    let other = unique("redismq:test:list:");
    let key = unique("redismq:test:str:");

    store.push_front(&list, "a").await.unwrap();
    assert_eq!(store.push_front(&list, "b").await.unwrap(), 2);
    assert_eq!(store.range(&list, 0, -1).await.unwrap(), vec!["b", "a"]);

    let moved = store
        .pop_push_blocking(&list, &other, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(moved.as_deref(), Some("a"));
    assert_eq!(store.len(&other).await.unwrap(), 1);

    assert!(store
        .set(&key, "v1", SetOptions::absent_expiring(Duration::from_secs(5)))
        .await
        .unwrap());
    assert!(!store
        .set(&key, "v2", SetOptions::absent_expiring(Duration::from_secs(5)))
        .await
        .unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("v1"));
    assert_eq!(
        store.get_many(&[key.clone(), unique("missing:")]).await.unwrap(),
        vec![Some("v1".to_string()), None]
    );

    let replies = store
        .transaction(vec![
            TxOp::PushFront {
                key: list.clone(),
                value: "c".to_string(),
            },
            TxOp::Delete { key: other.clone() },
            TxOp::Len { key: list.clone() },
        ])
        .await
        .unwrap();
    assert_eq!(replies, vec![2, 1, 2]);

    for k in [&list, &other, &key] {
        store.delete(k).await.unwrap();
    }
    assert!(!store.exists(&key).await.unwrap());
}

#[tokio::test]
async fn scan_finds_matching_keys() {
    let Some(connector) = connector() else { return };
    let mut store = connector.connect().await.unwrap();
    let prefix = unique("redismq:test:scan:");
    for i in 0..30 {
        store
            .set(&format!("{prefix}:{i}"), "x", SetOptions::expiring(Duration::from_secs(30)))
            .await
            .unwrap();
    }
    let found = scan_all(store.as_mut(), &format!("{prefix}:*"), 10)
        .await
        .unwrap();
    assert_eq!(found.len(), 30);
}

#[tokio::test]
async fn produce_and_consume_end_to_end() {
    let Some(connector) = connector() else { return };
    let connector = Arc::new(connector);
    let queue = unique("it");

    let mut config = Config::default();
    config.heartbeat.interval_ms = 100;
    config.heartbeat.ttl_ms = 1000;
    config.gc.lock_retry_interval_ms = 100;
    config.gc.scan_interval_ms = 100;

    let consumer = Consumer::new(
        &queue,
        config.clone(),
        connector.clone(),
        Arc::new(handler_fn(|_| async { Ok(()) })),
    )
    .unwrap();
    let mut events = consumer.subscribe();
    consumer.run().unwrap();

    let mut producer = Producer::connect(&queue, &config, connector.as_ref())
        .await
        .unwrap();
    let msg = producer.produce(&"hello").await.unwrap();

    let acknowledged = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(ConsumerEvent::Acknowledged(m)) = events.recv().await {
                return m;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(acknowledged.uuid, msg.uuid);
    consumer.shutdown().await.unwrap();
}
