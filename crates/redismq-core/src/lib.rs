pub mod config;
pub mod consumer;
pub mod error;
pub mod gc;
pub mod heartbeat;
pub mod lock;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use consumer::{handler_fn, Consumer, ConsumerEvent, ConsumerStatus, MessageHandler};
pub use error::{
    ConfigError, ConsumerError, HandlerError, ProducerError, StoreError, StoreResult,
};
pub use message::Message;
pub use producer::Producer;
pub use storage::{Connector, MemoryConnector, RedisConnector, Store};
