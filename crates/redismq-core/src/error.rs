/// Infrastructure failures from a [`Store`](crate::storage::Store). Lock
/// contention and empty reads are values, never errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors returned by the consumer lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer is already running")]
    AlreadyRunning,

    #[error("consumer is not running")]
    NotRunning,

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    /// A store fault while the consumer was running. The worker has been torn
    /// down; whoever owns it is expected to terminate.
    #[error("fatal store fault: {0}")]
    Fatal(#[source] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by a message handler. Recorded on the message as its
/// last error before it is requeued or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HandlerError {
    pub reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
