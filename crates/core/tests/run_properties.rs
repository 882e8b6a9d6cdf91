//! Integration tests for the run reducer.
//!
//! Drives [`WorkflowRun`] with event sequences parsed from wire JSON and
//! checks the resulting snapshots.

use std::sync::Arc;

use advisor_core::classifier::{classify, ErrorKind, FailureSignal, ServerErrorPayload};
use advisor_core::events::parse_event;
use advisor_core::finalizer::RecommendationAction;
use advisor_core::run::{Outcome, RunInput, RunStatus, WorkflowRun};
use advisor_core::stages::StageRegistry;
use advisor_core::tracker::StageStatus;
use advisor_core::types::RunId;
use chrono::{TimeZone, Utc};

fn registry(stages: usize) -> Arc<StageRegistry> {
    Arc::new(
        StageRegistry::from_pairs((0..stages).map(|i| (format!("Stage {i}"), "desc"))).unwrap(),
    )
}

fn event(json: &str) -> RunInput {
    RunInput::Event(parse_event(json).expect("test event should parse"))
}

fn step_start(step: usize, secs: i64) -> RunInput {
    event(&format!(
        r#"{{"type":"step_start","step":{step},"timestamp":"2025-03-01T12:00:{secs:02}Z"}}"#
    ))
}

fn step_complete(step: usize, secs: i64) -> RunInput {
    event(&format!(
        r#"{{"type":"step_complete","step":{step},"stepTime":1000,"timestamp":"2025-03-01T12:00:{secs:02}Z"}}"#
    ))
}

fn workflow_complete(text: &str, total_time: u64) -> RunInput {
    event(&format!(
        r#"{{"type":"workflow_complete","recommendation":{{"recommendation":"{text}","explanation":"Momentum favours PEPE"}},"totalTime":{total_time},"timestamp":"2025-03-01T12:00:59Z"}}"#
    ))
}

// ---------------------------------------------------------------------------
// Test: strict start/complete alternation ends with every stage completed
// ---------------------------------------------------------------------------

#[test]
fn alternating_start_complete_completes_every_stage() {
    for stages in 1..=5 {
        let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(stages), Utc::now());

        for i in 0..stages {
            assert_eq!(run.apply(step_start(i, (i * 2) as i64)), Outcome::Applied);
            assert_eq!(run.apply(step_complete(i, (i * 2 + 1) as i64)), Outcome::Applied);
        }
        let outcome = run.apply(workflow_complete("Hold for now", 1000));

        assert!(outcome.is_terminal());
        let snapshot = run.snapshot();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert!(snapshot.stages.iter().all(|s| s.status == StageStatus::Completed));
        assert!(snapshot.result.is_some());
        assert!(snapshot.failure.is_none());
    }
}

// ---------------------------------------------------------------------------
// Test: end-to-end scenario for subject S1
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_swap_recommendation() {
    let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(2), Utc::now());

    run.apply(step_start(0, 0));
    run.apply(step_complete(0, 1));
    run.apply(step_start(1, 2));
    run.apply(step_complete(1, 3));
    run.apply(workflow_complete("Swap ETH for PEPE and hold for 2-4 weeks", 4200));

    let snapshot = run.snapshot();
    assert_eq!(snapshot.subject_id, "S1");
    assert_eq!(snapshot.status, RunStatus::Completed);
    assert_eq!(snapshot.stages[0].status, StageStatus::Completed);
    assert_eq!(snapshot.stages[1].status, StageStatus::Completed);

    let result = snapshot.result.expect("result should be set");
    assert_eq!(result.action, RecommendationAction::Swap);
    assert_eq!(result.total_time_ms, 4200);
    assert_eq!(result.explanation, "Momentum favours PEPE");
    assert_eq!(
        snapshot.ended_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 59).unwrap())
    );
}

#[test]
fn end_to_end_hold_recommendation() {
    let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(1), Utc::now());
    run.apply(step_start(0, 0));
    run.apply(step_complete(0, 1));
    run.apply(workflow_complete(
        "Don't swap anything and hold ETH for more 1-2 weeks",
        900,
    ));

    assert_eq!(run.result().unwrap().action, RecommendationAction::Hold);
}

// ---------------------------------------------------------------------------
// Test: disconnect after a stage starts
// ---------------------------------------------------------------------------

#[test]
fn disconnect_marks_in_flight_stage_connectivity_errored() {
    let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(2), Utc::now());
    run.apply(step_start(0, 0));

    let outcome = run.apply(RunInput::Disconnected { at: Utc::now() });

    assert_eq!(outcome, Outcome::Terminal { end_session: false });
    let snapshot = run.snapshot();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.stages[0].status, StageStatus::ConnectivityErrored);
    assert_eq!(snapshot.stages[1].status, StageStatus::Pending);
    let failure = snapshot.failure.expect("failure should be set");
    assert_eq!(failure.kind, ErrorKind::Connectivity);
    assert!(failure.recoverable);
}

// ---------------------------------------------------------------------------
// Test: failures never rewind completed stages
// ---------------------------------------------------------------------------

#[test]
fn failure_never_rewinds_completed_stages() {
    let failures = [
        r#"{"type":"workflow_error","message":"boom"}"#,
        r#"{"type":"workflow_error","errorType":"rate_limit","message":"slow down"}"#,
        r#"{"type":"workflow_error","httpStatus":401}"#,
    ];

    for failure in failures {
        let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(3), Utc::now());
        run.apply(step_start(0, 0));
        run.apply(step_complete(0, 1));
        run.apply(step_start(1, 2));

        run.apply(event(failure));

        let snapshot = run.snapshot();
        assert_eq!(snapshot.stages[0].status, StageStatus::Completed);
        assert_eq!(snapshot.stages[1].status, StageStatus::Errored);
        assert_eq!(snapshot.stages[2].status, StageStatus::Pending);
    }
}

// ---------------------------------------------------------------------------
// Test: duplicate step_start keeps the original start time
// ---------------------------------------------------------------------------

#[test]
fn duplicate_step_start_is_idempotent() {
    let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(2), Utc::now());
    run.apply(step_start(0, 5));
    let first = run.snapshot().stages[0].started_at;

    assert_eq!(run.apply(step_start(0, 30)), Outcome::Ignored);

    assert_eq!(run.snapshot().stages[0].started_at, first);
    assert_eq!(
        first,
        Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap())
    );
}

// ---------------------------------------------------------------------------
// Test: classification table
// ---------------------------------------------------------------------------

#[test]
fn classification_table() {
    let connectivity = classify(&FailureSignal::Server(ServerErrorPayload {
        error_type: Some("connectivity_error".to_string()),
        ..Default::default()
    }));
    assert_eq!(connectivity.kind, ErrorKind::Connectivity);

    let unauthorized = classify(&FailureSignal::Server(ServerErrorPayload {
        http_status: Some(401),
        ..Default::default()
    }));
    assert_eq!(unauthorized.kind, ErrorKind::Unauthorized);

    let unknown = classify(&FailureSignal::Server(ServerErrorPayload {
        error_type: Some("quota_exhausted_somewhere".to_string()),
        message: Some("?".to_string()),
        http_status: Some(500),
    }));
    assert_eq!(unknown.kind, ErrorKind::ServerLogic);
}

// ---------------------------------------------------------------------------
// Test: snapshots are detached copies
// ---------------------------------------------------------------------------

#[test]
fn snapshot_is_not_affected_by_later_events() {
    let mut run = WorkflowRun::new(RunId::new_v4(), "S1", registry(2), Utc::now());
    run.apply(step_start(0, 0));
    let before = run.snapshot();

    run.apply(step_complete(0, 1));

    assert_eq!(before.stages[0].status, StageStatus::Processing);
    assert_eq!(run.snapshot().stages[0].status, StageStatus::Completed);
}
