//! Configuration models for slot pools and the thread pool.

pub mod pool;

pub use pool::{PoolConfig, RuntimeConfig, ENV_BATCH_SIZE, ENV_SEGMENT_LEN, ENV_WORKERS};
