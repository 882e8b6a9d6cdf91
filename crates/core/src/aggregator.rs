//! Per-stage narrative output.
//!
//! The server sends whole-text updates rather than deltas, so every
//! update replaces the stage's text wholesale.

use serde::Serialize;

use crate::error::CoreError;
use crate::stages::StageRegistry;
use crate::types::Timestamp;

/// Human-readable output for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    pub index: usize,
    /// Empty until the stage starts.
    pub text: String,
    pub last_updated_at: Option<Timestamp>,
}

impl StageOutput {
    fn empty(index: usize) -> Self {
        Self {
            index,
            text: String::new(),
            last_updated_at: None,
        }
    }
}

/// Holds the latest [`StageOutput`] for every stage.
#[derive(Debug, Clone)]
pub struct OutputAggregator {
    outputs: Vec<StageOutput>,
}

impl OutputAggregator {
    pub fn new(registry: &StageRegistry) -> Self {
        Self {
            outputs: registry
                .definitions()
                .iter()
                .map(|d| StageOutput::empty(d.index))
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        for output in &mut self.outputs {
            *output = StageOutput::empty(output.index);
        }
    }

    /// Replace the stage's text with the latest in-progress snapshot.
    pub fn on_partial_output(
        &mut self,
        index: usize,
        text: impl Into<String>,
        at: Timestamp,
    ) -> Result<(), CoreError> {
        self.replace(index, text.into(), at)
    }

    /// Replace the stage's text with its final summary.
    pub fn on_final_output(
        &mut self,
        index: usize,
        text: impl Into<String>,
        at: Timestamp,
    ) -> Result<(), CoreError> {
        self.replace(index, text.into(), at)
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.outputs.get(index).map(|o| o.text.as_str())
    }

    pub fn snapshot(&self) -> Vec<StageOutput> {
        self.outputs.clone()
    }

    fn replace(&mut self, index: usize, text: String, at: Timestamp) -> Result<(), CoreError> {
        let output = self
            .outputs
            .get_mut(index)
            .ok_or(CoreError::UnknownStage(index))?;
        output.text = text;
        output.last_updated_at = Some(at);
        Ok(())
    }
}
