use crate::tracker::StageStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown stage index {0}")]
    UnknownStage(usize),

    #[error("Stage {index} cannot move from {from} to {to}")]
    InvalidTransition {
        index: usize,
        from: StageStatus,
        to: StageStatus,
    },
}
