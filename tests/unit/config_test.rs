//! Tests for configuration validation

use prometheus_job_pool::config::{PoolConfig, RuntimeConfig};
use prometheus_job_pool::core::{PoolError, DEFAULT_BATCH_SIZE, DEFAULT_SEGMENT_LEN};
use prometheus_job_pool::{JobContext, JobKind, JobPool, SlotPool};

#[test]
fn test_pool_config_validation() {
    let valid = PoolConfig {
        initial_segment_len: 32,
    };
    assert!(valid.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_segment_len() {
    let invalid = PoolConfig {
        initial_segment_len: 0,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_runtime_config_invalid_batch_size() {
    let invalid = RuntimeConfig {
        worker_count: 4,
        batch_size: 0,
        pool: PoolConfig::default(),
    };
    assert_eq!(
        invalid.validate().unwrap_err(),
        "batch_size must be greater than 0"
    );
}

#[test]
fn test_runtime_config_from_json() {
    let json = r#"
    {
        "worker_count": 2,
        "batch_size": 25,
        "pool": { "initial_segment_len": 256 }
    }"#;

    let cfg = RuntimeConfig::from_json_str(json).expect("valid config");
    assert_eq!(cfg.worker_count, 2);
    assert_eq!(cfg.batch_size, 25);
    assert_eq!(cfg.pool.initial_segment_len, 256);
}

#[test]
fn test_runtime_config_from_json_defaults() {
    let cfg = RuntimeConfig::from_json_str("{}").expect("empty object is valid");
    assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
    assert_eq!(cfg.pool.initial_segment_len, DEFAULT_SEGMENT_LEN);
}

#[test]
fn test_runtime_config_from_json_rejects_invalid() {
    let err = RuntimeConfig::from_json_str(r#"{"worker_count": 0}"#).unwrap_err();
    assert!(err.contains("worker_count"));

    let err = RuntimeConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_config_round_trips_through_serde() {
    let cfg = RuntimeConfig::new()
        .with_worker_count(3)
        .with_pool(PoolConfig::new().with_initial_segment_len(7));
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(RuntimeConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_slot_pool_rejects_invalid_config() {
    let err = SlotPool::<u8>::with_config(&PoolConfig::new().with_initial_segment_len(0)).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_job_pool_uses_configured_segment_len() {
    struct Noop;

    impl JobKind for Noop {
        type Arg = ();

        fn run(_cx: JobContext<'_, Self>) {}
    }

    let pool = JobPool::<Noop>::with_config(&PoolConfig::new().with_initial_segment_len(3)).unwrap();
    let job = pool.alloc(()).unwrap();
    assert_eq!(pool.stats().capacity, 3);
    assert_eq!(pool.stats().next_segment_len, 3);

    job.lock().free();
    pool.destroy();
}
