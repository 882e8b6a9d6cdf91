use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use advisor_core::error::CoreError;
use advisor_core::stages::StageRegistry;

/// Default WebSocket base URL for the recommendation service.
const DEFAULT_WS_URL: &str = "ws://localhost:3000";

/// Default broadcast capacity for snapshot subscribers.
const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Default number of parsed events buffered between transport and engine.
const DEFAULT_EVENT_BUFFER: usize = 128;

/// How long an authorization error stays visible before the session ends.
const DEFAULT_SESSION_TEARDOWN_MS: u64 = 4000;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket base URL (default: `ws://localhost:3000`).
    pub ws_url: String,
    /// Buffered snapshots per subscriber before it lags (default: `64`).
    pub snapshot_capacity: usize,
    /// Buffered events per channel (default: `128`).
    pub event_buffer: usize,
    /// Delay between an `unauthorized` failure and session teardown
    /// (default: 4 seconds).
    pub session_teardown_delay: Duration,
    /// Optional JSON file with stage definitions.
    pub stages_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            event_buffer: DEFAULT_EVENT_BUFFER,
            session_teardown_delay: Duration::from_millis(DEFAULT_SESSION_TEARDOWN_MS),
            stages_file: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default               |
    /// |-------------------------------|-----------------------|
    /// | `ADVISOR_WS_URL`              | `ws://localhost:3000` |
    /// | `ADVISOR_SNAPSHOT_CAPACITY`   | `64`                  |
    /// | `ADVISOR_EVENT_BUFFER`        | `128`                 |
    /// | `ADVISOR_SESSION_TEARDOWN_MS` | `4000`                |
    /// | `ADVISOR_STAGES_FILE`         | unset                 |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ws_url = lookup("ADVISOR_WS_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_WS_URL.to_string());

        let snapshot_capacity = parse_or(
            &lookup,
            "ADVISOR_SNAPSHOT_CAPACITY",
            DEFAULT_SNAPSHOT_CAPACITY,
        )
        .max(1);

        let event_buffer = parse_or(&lookup, "ADVISOR_EVENT_BUFFER", DEFAULT_EVENT_BUFFER).max(1);

        let teardown_ms = parse_or(
            &lookup,
            "ADVISOR_SESSION_TEARDOWN_MS",
            DEFAULT_SESSION_TEARDOWN_MS,
        );

        let stages_file = lookup("ADVISOR_STAGES_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self {
            ws_url,
            snapshot_capacity,
            event_buffer,
            session_teardown_delay: Duration::from_millis(teardown_ms),
            stages_file,
        }
    }

    /// Stage registry from `stages_file`, or the built-in pipeline when
    /// none is configured.
    pub fn load_registry(&self) -> Result<StageRegistry, CoreError> {
        match &self.stages_file {
            None => Ok(StageRegistry::builtin()),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::Configuration(format!(
                        "failed to read stage file {}: {e}",
                        path.display()
                    ))
                })?;
                StageRegistry::from_json(&text)
            }
        }
    }
}

/// Parse an optional variable, falling back to `default` when it is
/// missing or malformed.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                variable = name,
                value = %raw,
                default = %default,
                "Invalid value, using default",
            );
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config.ws_url, "ws://localhost:3000");
        assert_eq!(config.snapshot_capacity, 64);
        assert_eq!(config.event_buffer, 128);
        assert_eq!(config.session_teardown_delay, Duration::from_secs(4));
        assert!(config.stages_file.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ADVISOR_WS_URL", "wss://advisor.example.com/"),
            ("ADVISOR_SNAPSHOT_CAPACITY", "8"),
            ("ADVISOR_EVENT_BUFFER", "16"),
            ("ADVISOR_SESSION_TEARDOWN_MS", "250"),
            ("ADVISOR_STAGES_FILE", "/etc/advisor/stages.json"),
        ]));
        assert_eq!(config.ws_url, "wss://advisor.example.com");
        assert_eq!(config.snapshot_capacity, 8);
        assert_eq!(config.event_buffer, 16);
        assert_eq!(config.session_teardown_delay, Duration::from_millis(250));
        assert_eq!(
            config.stages_file,
            Some(PathBuf::from("/etc/advisor/stages.json"))
        );
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("ADVISOR_SNAPSHOT_CAPACITY", "lots"),
            ("ADVISOR_SESSION_TEARDOWN_MS", "-5"),
        ]));
        assert_eq!(config.snapshot_capacity, 64);
        assert_eq!(config.session_teardown_delay, Duration::from_secs(4));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = EngineConfig::from_lookup(lookup(&[("ADVISOR_EVENT_BUFFER", "0")]));
        assert_eq!(config.event_buffer, 1);
    }

    #[test]
    fn builtin_registry_without_stage_file() {
        let registry = EngineConfig::default().load_registry().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn missing_stage_file_is_configuration_error() {
        let config = EngineConfig {
            stages_file: Some(PathBuf::from("/nonexistent/advisor-stages.json")),
            ..Default::default()
        };
        assert!(matches!(
            config.load_registry(),
            Err(CoreError::Configuration(_))
        ));
    }
}
