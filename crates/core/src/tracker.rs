//! Stage lifecycle tracking.
//!
//! Holds one [`StageState`] per registry stage. Status only moves
//! forward along `pending -> processing -> {completed | errored |
//! connectivity_errored}`; the only way back to `pending` is
//! [`StageTracker::reset`].

use serde::Serialize;

use crate::classifier::ErrorKind;
use crate::error::CoreError;
use crate::stages::StageRegistry;
use crate::types::Timestamp;

/// Lifecycle status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Errored,
    ConnectivityErrored,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Errored => "errored",
            StageStatus::ConnectivityErrored => "connectivity_errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Errored | StageStatus::ConnectivityErrored
        )
    }

    /// Failure status a stage takes when the run aborts with `kind`.
    pub fn failed_with(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Connectivity => StageStatus::ConnectivityErrored,
            _ => StageStatus::Errored,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time state of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageState {
    pub index: usize,
    pub status: StageStatus,
    pub started_at: Option<Timestamp>,
    /// When the stage left `processing`, by completion or by failure.
    pub completed_at: Option<Timestamp>,
}

impl StageState {
    fn pending(index: usize) -> Self {
        Self {
            index,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Tracks the status of every stage in a run.
#[derive(Debug, Clone)]
pub struct StageTracker {
    stages: Vec<StageState>,
}

impl StageTracker {
    /// One `pending` state per registry stage.
    pub fn new(registry: &StageRegistry) -> Self {
        Self {
            stages: registry
                .definitions()
                .iter()
                .map(|d| StageState::pending(d.index))
                .collect(),
        }
    }

    /// Return every stage to `pending`.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            *stage = StageState::pending(stage.index);
        }
    }

    /// Move a `pending` stage to `processing`.
    ///
    /// Returns `Ok(false)` without touching the stage if it has already
    /// advanced, so duplicate start events are harmless.
    pub fn on_stage_start(&mut self, index: usize, at: Timestamp) -> Result<bool, CoreError> {
        let stage = self.stage_mut(index)?;
        if stage.status != StageStatus::Pending {
            return Ok(false);
        }
        stage.status = StageStatus::Processing;
        stage.started_at = Some(at);
        Ok(true)
    }

    /// Move a `processing` stage to `completed`.
    pub fn on_stage_complete(&mut self, index: usize, at: Timestamp) -> Result<(), CoreError> {
        let stage = self.stage_mut(index)?;
        if stage.status != StageStatus::Processing {
            return Err(CoreError::InvalidTransition {
                index,
                from: stage.status,
                to: StageStatus::Completed,
            });
        }
        stage.status = StageStatus::Completed;
        stage.completed_at = Some(at);
        Ok(())
    }

    /// Fail the `processing` stage at `index`, and with it every other
    /// stage still in flight.
    ///
    /// Returns the indices of all stages that were failed.
    pub fn on_stage_fail(
        &mut self,
        index: usize,
        kind: ErrorKind,
        at: Timestamp,
    ) -> Result<Vec<usize>, CoreError> {
        let stage = self.stage_mut(index)?;
        if stage.status != StageStatus::Processing {
            return Err(CoreError::InvalidTransition {
                index,
                from: stage.status,
                to: StageStatus::failed_with(kind),
            });
        }
        Ok(self.fail_in_flight(kind, at))
    }

    /// Fail every stage currently `processing`. Stages in any other status
    /// are left alone.
    pub fn fail_in_flight(&mut self, kind: ErrorKind, at: Timestamp) -> Vec<usize> {
        let status = StageStatus::failed_with(kind);
        self.stages
            .iter_mut()
            .filter(|s| s.status == StageStatus::Processing)
            .map(|s| {
                s.status = status;
                s.completed_at = Some(at);
                s.index
            })
            .collect()
    }

    pub fn status(&self, index: usize) -> Option<StageStatus> {
        self.stages.get(index).map(|s| s.status)
    }

    pub fn get(&self, index: usize) -> Option<&StageState> {
        self.stages.get(index)
    }

    pub fn snapshot(&self) -> Vec<StageState> {
        self.stages.clone()
    }

    fn stage_mut(&mut self, index: usize) -> Result<&mut StageState, CoreError> {
        self.stages
            .get_mut(index)
            .ok_or(CoreError::UnknownStage(index))
    }
}
