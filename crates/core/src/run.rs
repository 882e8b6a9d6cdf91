//! The workflow run aggregate and its transition function.
//!
//! [`WorkflowRun::apply`] is the only way run state changes. It takes
//! one [`RunInput`] at a time, routes it to the tracker, aggregator and
//! finalizer, and reports an [`Outcome`] the caller uses to decide
//! whether the channel should close. Once a run reaches `completed` or
//! `failed` it is frozen and further input is ignored.

use std::sync::Arc;

use serde::Serialize;

use crate::aggregator::OutputAggregator;
use crate::classifier::{classify, ClassifiedError, FailureSignal, ServerErrorPayload};
use crate::events::{
    StepCompleteData, StepProgressData, StepStartData, WorkflowCompleteData, WorkflowEvent,
};
use crate::finalizer::{FinalRecommendation, RunFinalizer};
use crate::snapshot::Snapshot;
use crate::stages::StageRegistry;
use crate::tracker::{StageStatus, StageTracker};
use crate::types::{RunId, Timestamp};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a run: `idle -> running -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inputs and outcomes
// ---------------------------------------------------------------------------

/// Something that happened to the run's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    /// A parsed event from the server.
    Event(WorkflowEvent),
    /// The transport dropped.
    Disconnected { at: Timestamp },
    /// The server closed the channel.
    ChannelClosed { at: Timestamp },
    /// The run failed outside the stream, e.g. the channel never opened.
    Failed { signal: FailureSignal, at: Timestamp },
}

/// Result of applying one [`RunInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed; publish a new snapshot.
    Applied,
    /// Nothing changed.
    Ignored,
    /// The run just finished. `end_session` is set when the failure
    /// requires the session to be torn down.
    Terminal { end_session: bool },
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Terminal { .. })
    }

    pub fn changed_state(&self) -> bool {
        !matches!(self, Outcome::Ignored)
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One execution of the recommendation workflow for a single subject.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    run_id: RunId,
    subject_id: String,
    status: RunStatus,
    registry: Arc<StageRegistry>,
    tracker: StageTracker,
    outputs: OutputAggregator,
    finalizer: RunFinalizer,
    result: Option<FinalRecommendation>,
    failure: Option<ClassifiedError>,
    started_at: Timestamp,
    ended_at: Option<Timestamp>,
}

impl WorkflowRun {
    /// A fresh `idle` run with every stage `pending` and every output empty.
    pub fn new(
        run_id: RunId,
        subject_id: impl Into<String>,
        registry: Arc<StageRegistry>,
        started_at: Timestamp,
    ) -> Self {
        Self {
            run_id,
            subject_id: subject_id.into(),
            status: RunStatus::Idle,
            tracker: StageTracker::new(&registry),
            outputs: OutputAggregator::new(&registry),
            registry,
            finalizer: RunFinalizer::new(),
            result: None,
            failure: None,
            started_at,
            ended_at: None,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn result(&self) -> Option<&FinalRecommendation> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&ClassifiedError> {
        self.failure.as_ref()
    }

    pub fn tracker(&self) -> &StageTracker {
        &self.tracker
    }

    pub fn outputs(&self) -> &OutputAggregator {
        &self.outputs
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            run_id: self.run_id,
            subject_id: self.subject_id.clone(),
            status: self.status,
            stages: self.tracker.snapshot(),
            outputs: self.outputs.snapshot(),
            result: self.result.clone(),
            failure: self.failure.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }

    /// Apply one input. Never fails: rule violations are logged and the
    /// input is dropped.
    pub fn apply(&mut self, input: RunInput) -> Outcome {
        if self.status.is_terminal() {
            tracing::debug!(
                run_id = %self.run_id,
                status = %self.status,
                "Ignoring input for finished run",
            );
            return Outcome::Ignored;
        }

        match input {
            RunInput::Event(event) => self.dispatch(event),
            RunInput::Disconnected { at } => self.fail(&FailureSignal::Disconnected, at),
            RunInput::ChannelClosed { at } => self.fail(&FailureSignal::ChannelClosed, at),
            RunInput::Failed { signal, at } => self.fail(&signal, at),
        }
    }

    fn dispatch(&mut self, event: WorkflowEvent) -> Outcome {
        if event == WorkflowEvent::Unknown {
            tracing::warn!(run_id = %self.run_id, "Ignoring unrecognized workflow event");
            return Outcome::Ignored;
        }

        let went_live = self.mark_running();

        let outcome = match event {
            WorkflowEvent::Init(data) => {
                tracing::info!(
                    run_id = %self.run_id,
                    message = data.message.as_deref().unwrap_or(""),
                    "Workflow stream initialised",
                );
                Outcome::Applied
            }
            WorkflowEvent::WorkflowStart(data) => {
                if let Some(total) = data.total_steps {
                    if total != self.registry.len() {
                        tracing::warn!(
                            run_id = %self.run_id,
                            announced = total,
                            configured = self.registry.len(),
                            "Server stage count differs from the configured registry",
                        );
                    }
                }
                tracing::info!(run_id = %self.run_id, "Workflow started");
                Outcome::Applied
            }
            WorkflowEvent::StepStart(data) => self.on_step_start(data),
            WorkflowEvent::StepProgress(data) => self.on_step_progress(data),
            WorkflowEvent::StepComplete(data) => self.on_step_complete(data),
            WorkflowEvent::WorkflowComplete(data) => self.on_workflow_complete(data),
            WorkflowEvent::WorkflowError(data) => {
                tracing::error!(
                    run_id = %self.run_id,
                    step = ?data.step,
                    error_type = data.error_type.as_deref().unwrap_or(""),
                    error_message = data.message.as_deref().unwrap_or(""),
                    "Workflow reported an error",
                );
                let signal = FailureSignal::Server(ServerErrorPayload::from(&data));
                self.fail(&signal, data.timestamp)
            }
            WorkflowEvent::Unknown => Outcome::Ignored,
        };

        // The run went live even if the handler dropped the event.
        if went_live && outcome == Outcome::Ignored {
            Outcome::Applied
        } else {
            outcome
        }
    }

    // ---- individual event handlers ----

    fn on_step_start(&mut self, data: StepStartData) -> Outcome {
        match self.tracker.on_stage_start(data.step, data.timestamp) {
            Ok(true) => {
                let placeholder = data
                    .message
                    .unwrap_or_else(|| format!("{}...", self.registry.name_of(data.step)));
                if let Err(e) =
                    self.outputs
                        .on_partial_output(data.step, placeholder, data.timestamp)
                {
                    tracing::warn!(run_id = %self.run_id, error = %e, "Failed to record stage output");
                }
                tracing::debug!(run_id = %self.run_id, step = data.step, "Stage started");
                Outcome::Applied
            }
            Ok(false) => {
                tracing::debug!(
                    run_id = %self.run_id,
                    step = data.step,
                    "Ignoring duplicate stage start",
                );
                Outcome::Ignored
            }
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Ignoring stage start");
                Outcome::Ignored
            }
        }
    }

    fn on_step_progress(&mut self, data: StepProgressData) -> Outcome {
        if self.tracker.status(data.step) != Some(StageStatus::Processing) {
            tracing::warn!(
                run_id = %self.run_id,
                step = data.step,
                "Ignoring progress for a stage that is not processing",
            );
            return Outcome::Ignored;
        }
        match self
            .outputs
            .on_partial_output(data.step, data.message, data.timestamp)
        {
            Ok(()) => Outcome::Applied,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "Ignoring stage progress");
                Outcome::Ignored
            }
        }
    }

    fn on_step_complete(&mut self, data: StepCompleteData) -> Outcome {
        if let Err(e) = self.tracker.on_stage_complete(data.step, data.timestamp) {
            tracing::warn!(run_id = %self.run_id, error = %e, "Ignoring stage completion");
            return Outcome::Ignored;
        }

        let summary = data.message.unwrap_or_else(|| {
            format!(
                "{} completed in {:.1}s",
                self.registry.name_of(data.step),
                data.step_time as f64 / 1000.0,
            )
        });
        if let Err(e) = self
            .outputs
            .on_final_output(data.step, summary, data.timestamp)
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "Failed to record stage output");
        }

        tracing::debug!(
            run_id = %self.run_id,
            step = data.step,
            step_time_ms = data.step_time,
            "Stage completed",
        );
        Outcome::Applied
    }

    fn on_workflow_complete(&mut self, data: WorkflowCompleteData) -> Outcome {
        let payload = data.recommendation;
        let mut record = match self.finalizer.finalize(
            &payload.recommendation,
            &payload.explanation,
            data.total_time,
            data.timestamp,
        ) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "Failed to finalize run");
                return Outcome::Ignored;
            }
        };
        record.confidence = payload.confidence;

        tracing::info!(
            run_id = %self.run_id,
            action = %record.action,
            total_time_ms = record.total_time_ms,
            "Workflow completed",
        );

        self.result = Some(record);
        self.status = RunStatus::Completed;
        self.ended_at = Some(data.timestamp);
        Outcome::Terminal { end_session: false }
    }

    fn fail(&mut self, signal: &FailureSignal, at: Timestamp) -> Outcome {
        let error = classify(signal);
        let aborted = self.tracker.fail_in_flight(error.kind, at);

        tracing::error!(
            run_id = %self.run_id,
            kind = %error.kind,
            recoverable = error.recoverable,
            aborted_stages = ?aborted,
            "Workflow run failed: {}",
            error.message,
        );

        let end_session = error.ends_session();
        self.failure = Some(error);
        self.status = RunStatus::Failed;
        self.ended_at = Some(at);
        Outcome::Terminal { end_session }
    }

    /// Move an `idle` run to `running`. Returns whether the status changed.
    fn mark_running(&mut self) -> bool {
        if self.status != RunStatus::Idle {
            return false;
        }
        self.status = RunStatus::Running;
        tracing::info!(
            run_id = %self.run_id,
            subject_id = %self.subject_id,
            "Workflow run is live",
        );
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorKind;
    use crate::events::{RecommendationPayload, WorkflowErrorData};
    use crate::finalizer::RecommendationAction;
    use chrono::{Duration, Utc};

    fn new_run(stages: usize) -> WorkflowRun {
        let registry =
            StageRegistry::from_pairs((0..stages).map(|i| (format!("Stage {i}"), ""))).unwrap();
        WorkflowRun::new(RunId::new_v4(), "S1", Arc::new(registry), Utc::now())
    }

    fn start(step: usize, at: Timestamp) -> RunInput {
        RunInput::Event(WorkflowEvent::StepStart(StepStartData {
            timestamp: at,
            step,
            message: None,
        }))
    }

    fn complete(step: usize, at: Timestamp) -> RunInput {
        RunInput::Event(WorkflowEvent::StepComplete(StepCompleteData {
            timestamp: at,
            step,
            step_time: 1500,
            message: None,
        }))
    }

    fn done(text: &str, at: Timestamp) -> RunInput {
        RunInput::Event(WorkflowEvent::WorkflowComplete(WorkflowCompleteData {
            timestamp: at,
            recommendation: RecommendationPayload {
                recommendation: text.to_string(),
                explanation: "because".to_string(),
                confidence: Some(0.8),
            },
            total_time: 4200,
        }))
    }

    #[test]
    fn new_run_is_idle() {
        let run = new_run(2);
        assert_eq!(run.status(), RunStatus::Idle);
        assert!(run.result().is_none());
        assert!(run.failure().is_none());
    }

    #[test]
    fn first_event_moves_run_to_running() {
        let mut run = new_run(2);
        let outcome = run.apply(RunInput::Event(WorkflowEvent::Init(crate::events::InitData {
            timestamp: Utc::now(),
            message: None,
        })));
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(run.status(), RunStatus::Running);
    }

    #[test]
    fn unknown_event_does_not_start_run() {
        let mut run = new_run(2);
        assert_eq!(
            run.apply(RunInput::Event(WorkflowEvent::Unknown)),
            Outcome::Ignored
        );
        assert_eq!(run.status(), RunStatus::Idle);
    }

    #[test]
    fn step_start_sets_placeholder_text() {
        let mut run = new_run(2);
        run.apply(start(0, Utc::now()));
        assert_eq!(run.outputs().text(0), Some("Stage 0..."));
    }

    #[test]
    fn step_complete_synthesizes_summary() {
        let mut run = new_run(2);
        let now = Utc::now();
        run.apply(start(0, now));
        run.apply(complete(0, now));
        assert_eq!(run.outputs().text(0), Some("Stage 0 completed in 1.5s"));
    }

    #[test]
    fn progress_replaces_text_only_while_processing() {
        let mut run = new_run(1);
        let now = Utc::now();
        let progress = |text: &str| {
            RunInput::Event(WorkflowEvent::StepProgress(StepProgressData {
                timestamp: now,
                step: 0,
                message: text.to_string(),
            }))
        };

        assert_eq!(run.apply(progress("early")), Outcome::Ignored);
        assert_eq!(run.outputs().text(0), Some(""));

        run.apply(start(0, now));
        assert_eq!(run.apply(progress("ETH looks")), Outcome::Applied);
        assert_eq!(run.apply(progress("ETH looks overbought")), Outcome::Applied);
        assert_eq!(run.outputs().text(0), Some("ETH looks overbought"));
    }

    #[test]
    fn completion_finalizes_and_freezes() {
        let mut run = new_run(1);
        let now = Utc::now();
        run.apply(start(0, now));
        run.apply(complete(0, now));

        let outcome = run.apply(done("Swap ETH for PEPE", now));

        assert_eq!(outcome, Outcome::Terminal { end_session: false });
        assert_eq!(run.status(), RunStatus::Completed);
        let result = run.result().unwrap();
        assert_eq!(result.action, RecommendationAction::Swap);
        assert_eq!(result.confidence, Some(0.8));

        // Frozen: later input changes nothing.
        assert_eq!(run.apply(RunInput::Disconnected { at: now }), Outcome::Ignored);
        assert!(run.failure().is_none());
    }

    #[test]
    fn server_error_aborts_in_flight_stages() {
        let mut run = new_run(3);
        let now = Utc::now();
        run.apply(start(0, now));
        run.apply(complete(0, now));
        run.apply(start(1, now));

        let outcome = run.apply(RunInput::Event(WorkflowEvent::WorkflowError(
            WorkflowErrorData {
                timestamp: now + Duration::seconds(1),
                message: Some("model exploded".to_string()),
                error_type: None,
                http_status: None,
                step: Some(1),
            },
        )));

        assert_eq!(outcome, Outcome::Terminal { end_session: false });
        let snap = run.snapshot();
        assert_eq!(snap.status, RunStatus::Failed);
        assert_eq!(snap.stages[0].status, StageStatus::Completed);
        assert_eq!(snap.stages[1].status, StageStatus::Errored);
        assert_eq!(snap.stages[2].status, StageStatus::Pending);
        let failure = snap.failure.unwrap();
        assert_eq!(failure.kind, ErrorKind::ServerLogic);
        assert_eq!(failure.message, "model exploded");
    }

    #[test]
    fn auth_error_requests_session_teardown() {
        let mut run = new_run(1);
        let outcome = run.apply(RunInput::Event(WorkflowEvent::WorkflowError(
            WorkflowErrorData {
                timestamp: Utc::now(),
                message: None,
                error_type: Some("auth".to_string()),
                http_status: None,
                step: None,
            },
        )));
        assert_eq!(outcome, Outcome::Terminal { end_session: true });
    }

    #[test]
    fn channel_closed_without_terminal_event() {
        let mut run = new_run(1);
        let now = Utc::now();
        run.apply(start(0, now));

        run.apply(RunInput::ChannelClosed { at: now });

        assert_eq!(run.failure().unwrap().kind, ErrorKind::TransportClosed);
        assert_eq!(run.tracker().status(0), Some(StageStatus::Errored));
    }

    #[test]
    fn failure_keeps_last_outputs() {
        let mut run = new_run(1);
        let now = Utc::now();
        run.apply(start(0, now));
        run.apply(RunInput::Disconnected { at: now });

        assert_eq!(run.outputs().text(0), Some("Stage 0..."));
    }

    #[test]
    fn complete_for_unstarted_stage_is_ignored() {
        let mut run = new_run(2);
        let now = Utc::now();
        run.apply(start(0, now));

        assert_eq!(run.apply(complete(1, now)), Outcome::Ignored);
        assert_eq!(run.tracker().status(1), Some(StageStatus::Pending));
    }

    #[test]
    fn rejected_first_event_still_reports_run_going_live() {
        let mut run = new_run(2);

        let outcome = run.apply(complete(1, Utc::now()));

        assert_eq!(outcome, Outcome::Applied);
        assert!(outcome.changed_state());
        assert_eq!(run.status(), RunStatus::Running);
        assert_eq!(run.tracker().status(1), Some(StageStatus::Pending));
    }
}
