/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a single workflow run (UUID v4).
pub type RunId = uuid::Uuid;
