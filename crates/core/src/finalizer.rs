//! Final recommendation record.
//!
//! The action is derived from the recommendation text with a plain
//! case-insensitive substring scan. The phrases below must stay in step
//! with what the recommendation service writes.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Phrase that marks an explicit decision not to swap.
pub const HOLD_PHRASE: &str = "don't swap anything";

/// Keyword that marks a swap directive.
pub const SWAP_KEYWORD: &str = "swap";

/// What the recommendation tells the user to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendationAction {
    Hold,
    Swap,
}

impl RecommendationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationAction::Hold => "HOLD",
            RecommendationAction::Swap => "SWAP",
        }
    }
}

impl std::fmt::Display for RecommendationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify recommendation text as `HOLD` or `SWAP`.
///
/// The hold phrase wins over the swap keyword; text mentioning neither
/// defaults to `HOLD`.
///
/// # Examples
///
/// ```
/// use advisor_core::finalizer::{classify_action, RecommendationAction};
///
/// assert_eq!(
///     classify_action("Don't swap anything and hold ETH for more 1-2 weeks"),
///     RecommendationAction::Hold,
/// );
/// assert_eq!(
///     classify_action("Swap ETH for PEPE and hold for 2-4 weeks"),
///     RecommendationAction::Swap,
/// );
/// ```
pub fn classify_action(text: &str) -> RecommendationAction {
    let lowered = text.to_lowercase();
    if lowered.contains(HOLD_PHRASE) {
        RecommendationAction::Hold
    } else if lowered.contains(SWAP_KEYWORD) {
        RecommendationAction::Swap
    } else {
        RecommendationAction::Hold
    }
}

/// Immutable result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalRecommendation {
    pub action: RecommendationAction,
    pub raw_text: String,
    pub explanation: String,
    pub total_time_ms: u64,
    /// Only some recommendation services report a confidence score.
    pub confidence: Option<f64>,
    pub produced_at: Timestamp,
}

/// Produces the [`FinalRecommendation`] for a run, exactly once.
#[derive(Debug, Clone, Default)]
pub struct RunFinalizer {
    finalized: bool,
}

impl RunFinalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Build the final record. A second call fails with
    /// [`CoreError::InvalidState`].
    pub fn finalize(
        &mut self,
        raw_text: &str,
        explanation: &str,
        total_time_ms: u64,
        at: Timestamp,
    ) -> Result<FinalRecommendation, CoreError> {
        if self.finalized {
            return Err(CoreError::InvalidState(
                "run has already been finalized".to_string(),
            ));
        }
        self.finalized = true;

        Ok(FinalRecommendation {
            action: classify_action(raw_text),
            raw_text: raw_text.to_string(),
            explanation: explanation.to_string(),
            total_time_ms,
            confidence: None,
            produced_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    #[test]
    fn hold_phrase_wins_over_swap_keyword() {
        assert_eq!(
            classify_action("Don't swap anything and hold ETH for more 1-2 weeks"),
            RecommendationAction::Hold
        );
    }

    #[test]
    fn swap_keyword_is_case_insensitive() {
        assert_eq!(
            classify_action("Swap ETH for PEPE and hold for 2-4 weeks"),
            RecommendationAction::Swap
        );
        assert_eq!(classify_action("SWAP everything"), RecommendationAction::Swap);
    }

    #[test]
    fn no_keyword_defaults_to_hold() {
        assert_eq!(classify_action("Keep your position."), RecommendationAction::Hold);
        assert_eq!(classify_action(""), RecommendationAction::Hold);
    }

    #[test]
    fn incidental_swap_mention_counts_as_swap() {
        // Known limitation of the substring rule.
        assert_eq!(
            classify_action("Hold; swapping now would cost too much in fees"),
            RecommendationAction::Swap
        );
    }

    #[test]
    fn finalize_builds_record() {
        let mut finalizer = RunFinalizer::new();
        let now = Utc::now();

        let rec = finalizer
            .finalize("Swap ETH for PEPE", "Momentum is strong", 4200, now)
            .unwrap();

        assert_eq!(rec.action, RecommendationAction::Swap);
        assert_eq!(rec.raw_text, "Swap ETH for PEPE");
        assert_eq!(rec.explanation, "Momentum is strong");
        assert_eq!(rec.total_time_ms, 4200);
        assert_eq!(rec.produced_at, now);
        assert!(finalizer.is_finalized());
    }

    #[test]
    fn finalize_twice_is_invalid_state() {
        let mut finalizer = RunFinalizer::new();
        let now = Utc::now();
        finalizer.finalize("hold", "", 1, now).unwrap();

        assert_matches!(
            finalizer.finalize("hold", "", 1, now),
            Err(CoreError::InvalidState(_))
        );
    }

    #[test]
    fn action_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&RecommendationAction::Swap).unwrap(),
            "\"SWAP\""
        );
    }
}
