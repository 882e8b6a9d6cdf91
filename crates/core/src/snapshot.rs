//! Immutable point-in-time views of a run.

use serde::Serialize;

use crate::aggregator::StageOutput;
use crate::classifier::ClassifiedError;
use crate::finalizer::FinalRecommendation;
use crate::run::RunStatus;
use crate::tracker::StageState;
use crate::types::{RunId, Timestamp};

/// Everything a renderer needs to draw one run.
///
/// Produced after every processed event. The last known stage states and
/// outputs stay in place when the run fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub run_id: RunId,
    pub subject_id: String,
    pub status: RunStatus,
    pub stages: Vec<StageState>,
    pub outputs: Vec<StageOutput>,
    pub result: Option<FinalRecommendation>,
    pub failure: Option<ClassifiedError>,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
}

impl Snapshot {
    pub fn stage(&self, index: usize) -> Option<&StageState> {
        self.stages.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&StageOutput> {
        self.outputs.get(index)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A view that draws snapshots. Renderers only ever see shared
/// references and cannot change run state.
pub trait Renderer {
    fn render(&mut self, snapshot: &Snapshot);
}
