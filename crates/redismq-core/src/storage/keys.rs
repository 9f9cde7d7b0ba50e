//! Key schema for the shared keyspace.
//!
//! Every key lives under the `redismq:` namespace and uses `:` as the segment
//! separator, so queue names and ids must not contain `:`. Given the same
//! scope the output is deterministic; without a queue name only the
//! fleet-wide scan patterns are meaningful.

const NAMESPACE: &str = "redismq";
const SEPARATOR: char = ':';

/// Which parts of the keyspace a caller needs concrete keys for.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyScope<'a> {
    pub queue: Option<&'a str>,
    pub consumer: Option<&'a str>,
    pub producer: Option<&'a str>,
}

impl<'a> KeyScope<'a> {
    /// Scope with no ids: patterns only.
    pub fn fleet() -> Self {
        Self::default()
    }

    pub fn queue(queue: &'a str) -> Self {
        Self {
            queue: Some(queue),
            ..Self::default()
        }
    }

    pub fn consumer(queue: &'a str, consumer: &'a str) -> Self {
        Self {
            queue: Some(queue),
            consumer: Some(consumer),
            producer: None,
        }
    }

    pub fn producer(queue: &'a str, producer: &'a str) -> Self {
        Self {
            queue: Some(queue),
            consumer: None,
            producer: Some(producer),
        }
    }
}

/// The full vocabulary of keys and scan patterns for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub pattern_queue: String,
    pub pattern_dead: String,
    /// `processing:*` fleet-wide, narrowed to `processing:Q:*` when a queue is known.
    pub pattern_processing: String,
    pub pattern_heartbeat: String,
    pub pattern_gc: String,
    pub pattern_rate: String,
    pub pattern_rate_processing: String,
    pub pattern_rate_acknowledged: String,
    pub pattern_rate_unacknowledged: String,
    pub pattern_rate_input: String,

    pub queue: Option<String>,
    pub dead: Option<String>,
    pub gc_lock: Option<String>,
    pub gc_lock_tmp: Option<String>,
    pub producer_lock: Option<String>,
    pub producer_lock_tmp: Option<String>,

    pub processing: Option<String>,
    pub heartbeat: Option<String>,
    pub rate_processing: Option<String>,
    pub rate_acknowledged: Option<String>,
    pub rate_unacknowledged: Option<String>,

    pub rate_input: Option<String>,
}

fn key(parts: &[&str]) -> String {
    let mut out = String::from(NAMESPACE);
    for part in parts {
        out.push(SEPARATOR);
        out.push_str(part);
    }
    out
}

/// Accept either a bare queue name or a full main-queue key.
fn normalize_queue(queue: &str) -> &str {
    queue
        .strip_prefix(NAMESPACE)
        .and_then(|rest| rest.strip_prefix(":queue:"))
        .unwrap_or(queue)
}

impl Keys {
    pub fn new(scope: KeyScope<'_>) -> Self {
        let queue = scope.queue.map(normalize_queue);

        let mut keys = Self {
            pattern_queue: key(&["queue", "*"]),
            pattern_dead: key(&["dead", "*"]),
            pattern_processing: key(&["processing", "*"]),
            pattern_heartbeat: key(&["heartbeat", "*"]),
            pattern_gc: key(&["gc", "*"]),
            pattern_rate: key(&["rate", "*"]),
            pattern_rate_processing: key(&["rate", "processing", "*"]),
            pattern_rate_acknowledged: key(&["rate", "acknowledged", "*"]),
            pattern_rate_unacknowledged: key(&["rate", "unacknowledged", "*"]),
            pattern_rate_input: key(&["rate", "input", "*"]),
            queue: None,
            dead: None,
            gc_lock: None,
            gc_lock_tmp: None,
            producer_lock: None,
            producer_lock_tmp: None,
            processing: None,
            heartbeat: None,
            rate_processing: None,
            rate_acknowledged: None,
            rate_unacknowledged: None,
            rate_input: None,
        };

        let Some(q) = queue else {
            return keys;
        };

        keys.pattern_processing = key(&["processing", q, "*"]);
        keys.queue = Some(key(&["queue", q]));
        keys.dead = Some(key(&["dead", q]));
        keys.gc_lock = Some(key(&["gc", q, "lock"]));
        keys.gc_lock_tmp = Some(key(&["gc", q, "lock", "tmp"]));
        keys.producer_lock = Some(key(&["producer", q, "lock"]));
        keys.producer_lock_tmp = Some(key(&["producer", q, "lock", "tmp"]));

        if let Some(c) = scope.consumer {
            keys.processing = Some(key(&["processing", q, c]));
            keys.heartbeat = Some(key(&["heartbeat", q, c]));
            keys.rate_processing = Some(key(&["rate", "processing", q, c]));
            keys.rate_acknowledged = Some(key(&["rate", "acknowledged", q, c]));
            keys.rate_unacknowledged = Some(key(&["rate", "unacknowledged", q, c]));
        }
        if let Some(p) = scope.producer {
            keys.rate_input = Some(key(&["rate", "input", q, p]));
        }
        keys
    }

    /// Heartbeat key for an arbitrary consumer of a queue.
    pub fn heartbeat_of(queue: &str, consumer: &str) -> String {
        key(&["heartbeat", normalize_queue(queue), consumer])
    }
}

/// Whether `name` can be used as a single key segment.
pub fn is_valid_segment(name: &str) -> bool {
    !name.is_empty() && !name.contains(SEPARATOR) && !name.contains(['*', '?', '[', ']'])
}

/// The parsed form of a key produced by [`Keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegments {
    Queue { queue: String },
    DeadLetter { queue: String },
    Processing { queue: String, consumer: String },
    Heartbeat { queue: String, consumer: String },
    Rate { kind: String, queue: String, id: String },
    Unknown,
}

impl KeySegments {
    pub fn parse(key: &str) -> Self {
        let Some(rest) = key
            .strip_prefix(NAMESPACE)
            .and_then(|r| r.strip_prefix(SEPARATOR))
        else {
            return Self::Unknown;
        };
        let parts: Vec<&str> = rest.split(SEPARATOR).collect();
        match parts.as_slice() {
            ["queue", q] => Self::Queue {
                queue: q.to_string(),
            },
            ["dead", q] => Self::DeadLetter {
                queue: q.to_string(),
            },
            ["processing", q, c] => Self::Processing {
                queue: q.to_string(),
                consumer: c.to_string(),
            },
            ["heartbeat", q, c] => Self::Heartbeat {
                queue: q.to_string(),
                consumer: c.to_string(),
            },
            ["rate", kind, q, id] => Self::Rate {
                kind: kind.to_string(),
                queue: q.to_string(),
                id: id.to_string(),
            },
            _ => Self::Unknown,
        }
    }

    pub fn queue(&self) -> Option<&str> {
        match self {
            Self::Queue { queue }
            | Self::DeadLetter { queue }
            | Self::Processing { queue, .. }
            | Self::Heartbeat { queue, .. }
            | Self::Rate { queue, .. } => Some(queue),
            Self::Unknown => None,
        }
    }

    pub fn consumer(&self) -> Option<&str> {
        match self {
            Self::Processing { consumer, .. } | Self::Heartbeat { consumer, .. } => Some(consumer),
            _ => None,
        }
    }
}
