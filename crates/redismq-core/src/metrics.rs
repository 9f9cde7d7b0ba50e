use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// Message rate counters. Components hold an `Option<Arc<Metrics>>` that is
/// only populated when `monitor.enabled` is set.
pub struct Metrics {
    pub processing: Counter<u64>,
    pub acknowledged: Counter<u64>,
    pub unacknowledged: Counter<u64>,
    pub input: Counter<u64>,
    pub requeued: Counter<u64>,
    pub dead_lettered: Counter<u64>,
    pub expired: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("redismq");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            processing: meter
                .u64_counter("redismq.messages.processing")
                .with_description("Messages claimed from the main queue")
                .build(),
            acknowledged: meter
                .u64_counter("redismq.messages.acknowledged")
                .with_description("Messages handled successfully")
                .build(),
            unacknowledged: meter
                .u64_counter("redismq.messages.unacknowledged")
                .with_description("Handler failures and timeouts")
                .build(),
            input: meter
                .u64_counter("redismq.messages.input")
                .with_description("Messages produced")
                .build(),
            requeued: meter
                .u64_counter("redismq.messages.requeued")
                .with_description("Messages pushed back onto the main queue")
                .build(),
            dead_lettered: meter
                .u64_counter("redismq.messages.dead_lettered")
                .with_description("Messages moved to the dead-letter queue")
                .build(),
            expired: meter
                .u64_counter("redismq.messages.expired")
                .with_description("Messages dropped after their TTL elapsed")
                .build(),
        }
    }

    fn labels(queue: &str) -> [KeyValue; 1] {
        [KeyValue::new("queue", queue.to_string())]
    }

    pub fn record_processing(&self, queue: &str) {
        self.processing.add(1, &Self::labels(queue));
    }

    pub fn record_acknowledged(&self, queue: &str) {
        self.acknowledged.add(1, &Self::labels(queue));
    }

    pub fn record_unacknowledged(&self, queue: &str) {
        self.unacknowledged.add(1, &Self::labels(queue));
    }

    pub fn record_input(&self, queue: &str) {
        self.input.add(1, &Self::labels(queue));
    }

    pub fn record_requeued(&self, queue: &str) {
        self.requeued.add(1, &Self::labels(queue));
    }

    pub fn record_dead_lettered(&self, queue: &str) {
        self.dead_lettered.add(1, &Self::labels(queue));
    }

    pub fn record_expired(&self, queue: &str) {
        self.expired.add(1, &Self::labels(queue));
    }
}
