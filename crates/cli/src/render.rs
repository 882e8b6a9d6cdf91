//! Terminal renderer that logs what changed between snapshots.

use std::sync::Arc;

use advisor_core::run::RunStatus;
use advisor_core::snapshot::{Renderer, Snapshot};
use advisor_core::stages::StageRegistry;
use advisor_core::tracker::StageStatus;

/// One visible difference between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Run(RunStatus),
    Stage { index: usize, status: StageStatus },
    Output { index: usize },
}

/// Differences from `previous` to `next`. A snapshot from a different run
/// is compared against an empty view.
pub fn changes(previous: Option<&Snapshot>, next: &Snapshot) -> Vec<Change> {
    let previous = previous.filter(|p| p.run_id == next.run_id);
    let mut out = Vec::new();

    if previous.map(|p| p.status) != Some(next.status) {
        out.push(Change::Run(next.status));
    }

    for stage in &next.stages {
        let before = previous
            .and_then(|p| p.stage(stage.index))
            .map(|s| s.status)
            .unwrap_or(StageStatus::Pending);
        if before != stage.status {
            out.push(Change::Stage {
                index: stage.index,
                status: stage.status,
            });
        }
    }

    for output in &next.outputs {
        let before = previous
            .and_then(|p| p.output(output.index))
            .map(|o| o.text.as_str())
            .unwrap_or("");
        if before != output.text {
            out.push(Change::Output {
                index: output.index,
            });
        }
    }

    out
}

/// Logs stage transitions and output updates through `tracing`.
pub struct LogRenderer {
    registry: Arc<StageRegistry>,
    previous: Option<Snapshot>,
}

impl LogRenderer {
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            previous: None,
        }
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, snapshot: &Snapshot) {
        for change in changes(self.previous.as_ref(), snapshot) {
            match change {
                Change::Run(RunStatus::Idle) => {
                    tracing::debug!(run_id = %snapshot.run_id, "Waiting for workflow to start");
                }
                Change::Run(RunStatus::Running) => {
                    tracing::info!(
                        run_id = %snapshot.run_id,
                        subject_id = %snapshot.subject_id,
                        "Workflow running",
                    );
                }
                Change::Run(RunStatus::Completed) => {
                    if let Some(result) = &snapshot.result {
                        tracing::info!(
                            action = result.action.as_str(),
                            total_time_ms = result.total_time_ms,
                            "Recommendation ready",
                        );
                    }
                }
                Change::Run(RunStatus::Failed) => {
                    if let Some(failure) = &snapshot.failure {
                        tracing::error!(
                            kind = failure.kind.as_str(),
                            recoverable = failure.recoverable,
                            "{}",
                            failure.message,
                        );
                    }
                }
                Change::Stage { index, status } => {
                    tracing::info!(
                        stage = %self.registry.name_of(index),
                        status = status.as_str(),
                        "Stage updated",
                    );
                }
                Change::Output { index } => {
                    if let Some(output) = snapshot.output(index) {
                        tracing::debug!(
                            stage = %self.registry.name_of(index),
                            text = %output.text,
                            "Stage output",
                        );
                    }
                }
            }
        }
        self.previous = Some(snapshot.clone());
    }
}
