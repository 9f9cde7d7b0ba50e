pub mod keys;
mod memory;
mod redis;
mod traits;

pub use self::memory::{MemoryConnector, MemoryStore};
pub use self::redis::{RedisConnector, RedisStore};
pub use traits::{scan_all, Connector, SetOptions, Store, TxOp};
