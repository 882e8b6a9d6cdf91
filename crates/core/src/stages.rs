//! Ordered registry of pipeline stage definitions.
//!
//! The registry is fixed at construction. Stage indices are the only
//! cross-reference key used by the tracker, the aggregator and the wire
//! events, so they must be unique and contiguous from zero.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One named step of the recommendation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub index: usize,
    pub name: String,
    pub description: String,
}

impl StageDefinition {
    pub fn new(index: usize, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Entry shape accepted by [`StageRegistry::from_json`].
///
/// `index` may be omitted on every entry, in which case indices follow
/// array order.
#[derive(Debug, Deserialize)]
struct StageEntry {
    index: Option<usize>,
    name: String,
    #[serde(default)]
    description: String,
}

/// Immutable, ordered list of [`StageDefinition`]s for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRegistry {
    definitions: Vec<StageDefinition>,
}

impl StageRegistry {
    /// Build a registry, validating that indices are exactly `0..n`.
    ///
    /// Definitions may be supplied in any order; they are stored sorted
    /// by index.
    pub fn new(mut definitions: Vec<StageDefinition>) -> Result<Self, CoreError> {
        if definitions.is_empty() {
            return Err(CoreError::Configuration(
                "stage registry must define at least one stage".to_string(),
            ));
        }

        definitions.sort_by_key(|d| d.index);

        for (position, definition) in definitions.iter().enumerate() {
            if definition.index != position {
                return Err(CoreError::Configuration(format!(
                    "stage indices must be unique and contiguous from 0: expected {position}, found {} ({})",
                    definition.index, definition.name,
                )));
            }
            if definition.name.trim().is_empty() {
                return Err(CoreError::Configuration(format!(
                    "stage {position} has an empty name"
                )));
            }
        }

        Ok(Self { definitions })
    }

    /// Build a registry from `(name, description)` pairs, assigning
    /// indices in order.
    pub fn from_pairs<N, D>(pairs: impl IntoIterator<Item = (N, D)>) -> Result<Self, CoreError>
    where
        N: Into<String>,
        D: Into<String>,
    {
        let definitions = pairs
            .into_iter()
            .enumerate()
            .map(|(index, (name, description))| StageDefinition::new(index, name, description))
            .collect();
        Self::new(definitions)
    }

    /// Parse a JSON array of `{index?, name, description?}` objects.
    ///
    /// Either every entry carries an `index` or none does.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let entries: Vec<StageEntry> = serde_json::from_str(text)
            .map_err(|e| CoreError::Configuration(format!("invalid stage definitions: {e}")))?;

        let indexed = entries.iter().filter(|e| e.index.is_some()).count();
        if indexed != 0 && indexed != entries.len() {
            return Err(CoreError::Configuration(
                "either every stage definition carries an index or none does".to_string(),
            ));
        }

        let definitions = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| StageDefinition {
                index: entry.index.unwrap_or(position),
                name: entry.name,
                description: entry.description,
            })
            .collect();
        Self::new(definitions)
    }

    /// The two-stage pipeline used when no stage file is configured.
    pub fn builtin() -> Self {
        Self {
            definitions: vec![
                StageDefinition::new(
                    0,
                    "Market Analysis",
                    "Reviewing holdings, price action and market sentiment",
                ),
                StageDefinition::new(
                    1,
                    "Decision",
                    "Weighing the analysis against the strategy and choosing an action",
                ),
            ],
        }
    }

    pub fn definitions(&self) -> &[StageDefinition] {
        &self.definitions
    }

    pub fn get(&self, index: usize) -> Option<&StageDefinition> {
        self.definitions.get(index)
    }

    /// Stage name for display, falling back to `Stage <n>` for indices
    /// outside the registry.
    pub fn name_of(&self, index: usize) -> String {
        self.get(index)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("Stage {index}"))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
