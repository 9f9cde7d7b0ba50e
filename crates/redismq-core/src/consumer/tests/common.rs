use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::producer::Producer;

pub(super) const QUEUE: &str = "orders";
pub(super) const MAIN: &str = "redismq:queue:orders";
pub(super) const DEAD: &str = "redismq:dead:orders";

/// Millisecond-scale timings so lifecycle tests finish quickly.
pub(super) fn test_config() -> Config {
    let mut config = Config::default();
    config.heartbeat.interval_ms = 20;
    config.heartbeat.ttl_ms = 300;
    config.gc.lock_retry_interval_ms = 20;
    config.gc.scan_interval_ms = 30;
    config
}

pub(super) fn test_consumer(
    connector: &MemoryConnector,
    config: Config,
    handler: Arc<dyn MessageHandler>,
) -> Consumer {
    Consumer::new(QUEUE, config, Arc::new(connector.clone()), handler).unwrap()
}

pub(super) async fn produce(connector: &MemoryConnector, payload: serde_json::Value) -> Message {
    let mut producer = Producer::connect(QUEUE, &Config::default(), connector)
        .await
        .unwrap();
    producer.produce(&payload).await.unwrap()
}

pub(super) fn ok_handler() -> Arc<dyn MessageHandler> {
    Arc::new(handler_fn(|_| async { Ok(()) }))
}

/// Fails the first `failures` calls, then succeeds. Returns the call counter.
pub(super) fn failing_handler(failures: u32) -> (Arc<dyn MessageHandler>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let handler = handler_fn(move |_| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if call <= failures {
                Err(HandlerError::new(format!("failure #{call}")))
            } else {
                Ok(())
            }
        }
    });
    (Arc::new(handler), calls)
}

pub(super) fn calls(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}

/// Next event of any kind.
pub(super) async fn next_event(rx: &mut broadcast::Receiver<ConsumerEvent>) -> ConsumerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for consumer event")
        .expect("event channel closed")
}

/// Skip events until one matches.
pub(super) async fn wait_for(
    rx: &mut broadcast::Receiver<ConsumerEvent>,
    matches: impl Fn(&ConsumerEvent) -> bool,
) -> ConsumerEvent {
    loop {
        let event = next_event(rx).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Skip everything but per-message outcomes.
pub(super) async fn next_outcome(rx: &mut broadcast::Receiver<ConsumerEvent>) -> ConsumerEvent {
    wait_for(rx, |e| {
        !matches!(
            e,
            ConsumerEvent::Up | ConsumerEvent::Down | ConsumerEvent::LeadershipAcquired
        )
    })
    .await
}

pub(super) async fn wait_until_down(consumer: &Consumer) {
    let mut status = consumer.watch_status();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s == ConsumerStatus::Down),
    )
    .await
    .expect("timed out waiting for consumer to go down")
    .expect("status channel closed");
}

/// Keys left behind under the queue's processing pattern.
pub(super) fn processing_lists(connector: &MemoryConnector) -> Vec<String> {
    connector
        .keys()
        .into_iter()
        .filter(|k| k.starts_with("redismq:processing:orders:"))
        .collect()
}

/// Poll `condition` until it holds.
pub(super) async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
