//! Workflow stream event types and parser.
//!
//! The recommendation service pushes JSON objects shaped like
//! `{"type": "<kind>", "timestamp": "...", ...}` with camelCase field
//! names. This module deserializes them into a strongly-typed
//! [`WorkflowEvent`] enum.

use serde::{Deserialize, Serialize};

use crate::classifier::ServerErrorPayload;
use crate::types::Timestamp;

fn now() -> Timestamp {
    chrono::Utc::now()
}

/// All known workflow stream events.
///
/// Deserialized via the internally-tagged `"type"` field. Types this
/// client does not know about land in [`WorkflowEvent::Unknown`] so the
/// server can add event kinds without breaking older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The stream is open and the server accepted the request.
    Init(InitData),

    /// The workflow pipeline has begun.
    WorkflowStart(WorkflowStartData),

    /// A stage has started processing.
    StepStart(StepStartData),

    /// Updated narrative text for a stage still in progress.
    StepProgress(StepProgressData),

    /// A stage finished.
    StepComplete(StepCompleteData),

    /// The workflow produced its recommendation.
    WorkflowComplete(WorkflowCompleteData),

    /// The workflow failed on the server.
    WorkflowError(WorkflowErrorData),

    #[serde(other)]
    Unknown,
}

impl WorkflowEvent {
    /// Wire name of the event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            WorkflowEvent::Init(_) => "init",
            WorkflowEvent::WorkflowStart(_) => "workflow_start",
            WorkflowEvent::StepStart(_) => "step_start",
            WorkflowEvent::StepProgress(_) => "step_progress",
            WorkflowEvent::StepComplete(_) => "step_complete",
            WorkflowEvent::WorkflowComplete(_) => "workflow_complete",
            WorkflowEvent::WorkflowError(_) => "workflow_error",
            WorkflowEvent::Unknown => "unknown",
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            WorkflowEvent::Init(d) => Some(d.timestamp),
            WorkflowEvent::WorkflowStart(d) => Some(d.timestamp),
            WorkflowEvent::StepStart(d) => Some(d.timestamp),
            WorkflowEvent::StepProgress(d) => Some(d.timestamp),
            WorkflowEvent::StepComplete(d) => Some(d.timestamp),
            WorkflowEvent::WorkflowComplete(d) => Some(d.timestamp),
            WorkflowEvent::WorkflowError(d) => Some(d.timestamp),
            WorkflowEvent::Unknown => None,
        }
    }

    /// `true` for events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowComplete(_) | WorkflowEvent::WorkflowError(_)
        )
    }
}

/// Payload for `init` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub message: Option<String>,
}

/// Payload for `workflow_start` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStartData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub message: Option<String>,
    /// Stage count announced by the server, when it sends one.
    pub total_steps: Option<usize>,
}

/// Payload for `step_start` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStartData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub step: usize,
    pub message: Option<String>,
}

/// Payload for `step_progress` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgressData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub step: usize,
    /// Full narrative so far, not a delta.
    pub message: String,
}

/// Payload for `step_complete` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompleteData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub step: usize,
    /// Stage duration in milliseconds.
    #[serde(default)]
    pub step_time: u64,
    pub message: Option<String>,
}

/// The recommendation body inside `workflow_complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationPayload {
    pub recommendation: String,
    #[serde(default)]
    pub explanation: String,
    pub confidence: Option<f64>,
}

/// Payload for `workflow_complete` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCompleteData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    pub recommendation: RecommendationPayload,
    /// Whole-run duration in milliseconds.
    #[serde(default)]
    pub total_time: u64,
}

/// Payload for `workflow_error` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorData {
    #[serde(default = "now")]
    pub timestamp: Timestamp,
    #[serde(alias = "error")]
    pub message: Option<String>,
    #[serde(alias = "error_type")]
    pub error_type: Option<String>,
    #[serde(alias = "http_status")]
    pub http_status: Option<u16>,
    /// Stage that was running when the error occurred, if reported.
    pub step: Option<usize>,
}

impl From<&WorkflowErrorData> for ServerErrorPayload {
    fn from(data: &WorkflowErrorData) -> Self {
        Self {
            error_type: data.error_type.clone(),
            message: data.message.clone(),
            http_status: data.http_status,
        }
    }
}

/// Parse a workflow stream text frame into a typed event.
///
/// Returns `Err` for malformed JSON or missing required fields. Unknown
/// `type` values parse successfully as [`WorkflowEvent::Unknown`].
pub fn parse_event(text: &str) -> Result<WorkflowEvent, serde_json::Error> {
    serde_json::from_str(text)
}
