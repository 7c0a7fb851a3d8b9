//! Tests for error types

use prometheus_job_pool::core::{fatal, PoolError, ProtocolViolation};
use prometheus_job_pool::{JobState, SlotId};

#[test]
fn test_resource_exhausted_error() {
    let err = PoolError::ResourceExhausted { slots: 4096 };
    assert_eq!(
        format!("{err}"),
        "resource exhausted: could not reserve a segment of 4096 slots"
    );
}

#[test]
fn test_invalid_config_error() {
    let err = PoolError::InvalidConfig("batch_size must be greater than 0".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid configuration: batch_size must be greater than 0"
    );
}

#[test]
fn test_double_free_message() {
    let violation = ProtocolViolation::DoubleFree(SlotId { segment: 1, index: 9 });
    assert_eq!(format!("{violation}"), "double free of slot 1:9");
}

#[test]
fn test_parent_without_dependencies_message() {
    let violation = ProtocolViolation::ParentWithoutDependencies(SlotId { segment: 0, index: 3 });
    assert_eq!(
        format!("{violation}"),
        "parent 0:3 has 0 dependencies where it should have at least 1, did a job run twice?"
    );
}

#[test]
fn test_state_in_violation_message() {
    let violation = ProtocolViolation::RanTwice {
        id: SlotId { segment: 2, index: 0 },
        state: JobState::Finished,
    };
    assert_eq!(
        format!("{violation}"),
        "job 2:0 dequeued while finished, did a job run twice?"
    );
}

#[test]
fn test_stale_handle_messages() {
    let id = SlotId { segment: 0, index: 1023 };
    assert_eq!(
        ProtocolViolation::UseAfterFree(id).to_string(),
        "job 0:1023 used after it was freed"
    );
    let violation = ProtocolViolation::ParentNotPending {
        id,
        state: JobState::Running,
    };
    assert_eq!(violation.to_string(), "job 0:1023 linked as a parent while running");
}

#[test]
fn test_anyhow_wraps_pool_error() {
    fn build() -> prometheus_job_pool::core::AppResult<()> {
        let reserved: Result<(), PoolError> = Err(PoolError::ResourceExhausted { slots: 1 });
        reserved?;
        Ok(())
    }

    let err = build().unwrap_err();
    assert!(err.downcast_ref::<PoolError>().is_some());
}

#[test]
#[should_panic(expected = "job 0:0 waited on while finished")]
fn test_fatal_reports_violation() {
    fatal(ProtocolViolation::AlreadyWaited {
        id: SlotId { segment: 0, index: 0 },
        state: JobState::Finished,
    });
}
