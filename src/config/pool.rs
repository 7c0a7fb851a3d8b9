//! Slot pool and thread pool configuration structures.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::memory_pool::DEFAULT_SEGMENT_LEN;
use crate::core::thread_pool::DEFAULT_BATCH_SIZE;

/// Environment variable overriding [`RuntimeConfig::worker_count`].
pub const ENV_WORKERS: &str = "JOB_POOL_WORKERS";
/// Environment variable overriding [`RuntimeConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "JOB_POOL_BATCH_SIZE";
/// Environment variable overriding [`PoolConfig::initial_segment_len`].
pub const ENV_SEGMENT_LEN: &str = "JOB_POOL_SEGMENT_LEN";

/// Slot pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Slot count of the first segment.
    pub initial_segment_len: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_segment_len: DEFAULT_SEGMENT_LEN,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the slot count of the first segment.
    #[must_use]
    pub const fn with_initial_segment_len(mut self, len: usize) -> Self {
        self.initial_segment_len = len;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_segment_len == 0 {
            return Err("initial_segment_len must be greater than 0".into());
        }
        Ok(())
    }
}

/// Thread pool configuration, plus the pool settings job pools are built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads running the worker loop, the hosting thread included.
    pub worker_count: usize,
    /// Jobs a worker takes from the queue at a time.
    pub batch_size: usize,
    /// Settings for job pools.
    pub pool: PoolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            batch_size: DEFAULT_BATCH_SIZE,
            pool: PoolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a configuration with one worker per logical CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of workers.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the number of jobs taken from the queue at a time.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Replaces the job pool settings.
    #[must_use]
    pub const fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate all values, including the nested pool settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns a message if the input is not valid JSON for this type or
    /// fails validation.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading `.env` first if
    /// one exists.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable is not a valid number or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup, e.g. a map in tests.
    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_WORKERS)? {
            cfg.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_BATCH_SIZE)? {
            cfg.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SEGMENT_LEN)? {
            cfg.pool.initial_segment_len = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}=`{raw}` is invalid: {e}"))
        })
        .transpose()
}
