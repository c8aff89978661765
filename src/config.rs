//! Configuration loading and validation.
//!
//! Reads `agentflow.yaml` and resolves environment variables. Every section
//! and field has a default, so a missing section (or an empty file) yields the
//! documented defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::types::AgentKind;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "agentflow.yaml";

/// Environment variable that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "AGENTFLOW_CONFIG";

/// Upper bound on `router.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 16;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while locating, reading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found (searched for {CONFIG_FILE_NAME})")]
    NotFound,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `agentflow.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentflowConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub integration: IntegrationConfig,
}

/// Router behaviour: threshold, fallback, retry budget.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Classifications below this confidence are not routed by keyword overlap.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Route low-confidence input to `default_agent` instead of failing.
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    #[serde(default = "default_agent")]
    pub default_agent: AgentKind,
    /// Extra attempts after the first failed agent execution.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Budget for the whole execution, retries included.
    #[serde(default = "default_router_timeout_ms")]
    pub timeout_ms: u64,
    /// Base delay between retries (doubles each attempt).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Capacity of the routing-history ring buffer.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Input classifier tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Below this primary score the secondary disambiguation pass runs.
    #[serde(default = "default_disambiguation_threshold")]
    pub disambiguation_threshold: f32,
    /// Confidence assigned to recognized casual input.
    #[serde(default = "default_casual_confidence")]
    pub casual_confidence: f32,
    /// Longer messages are never treated as casual.
    #[serde(default = "default_max_casual_words")]
    pub max_casual_words: usize,
}

/// Workflow budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub node_timeout_ms: Option<u64>,
}

/// Integration manager settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    /// Number of finished execution records kept in memory.
    #[serde(default = "default_execution_history_capacity")]
    pub execution_history_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_agent() -> AgentKind {
    AgentKind::GeneralAssistant
}
fn default_max_retries() -> u32 {
    2
}
fn default_router_timeout_ms() -> u64 {
    30_000
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_history_capacity() -> usize {
    100
}
fn default_disambiguation_threshold() -> f32 {
    0.75
}
fn default_casual_confidence() -> f32 {
    0.95
}
fn default_max_casual_words() -> usize {
    6
}
fn default_max_steps() -> usize {
    50
}
fn default_workflow_timeout_ms() -> u64 {
    300_000
}
fn default_capability_timeout_ms() -> u64 {
    30_000
}
fn default_execution_history_capacity() -> usize {
    200
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            enable_fallback: true,
            default_agent: default_agent(),
            max_retries: default_max_retries(),
            timeout_ms: default_router_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl RouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            disambiguation_threshold: default_disambiguation_threshold(),
            casual_confidence: default_casual_confidence(),
            max_casual_words: default_max_casual_words(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            timeout_ms: default_workflow_timeout_ms(),
            node_timeout_ms: None,
        }
    }
}

impl WorkflowConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            capability_timeout_ms: default_capability_timeout_ms(),
            execution_history_capacity: default_execution_history_capacity(),
        }
    }
}

impl IntegrationConfig {
    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }
}

impl AgentflowConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.router.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid {
                field: "router.confidence_threshold",
                reason: format!("{threshold} is outside [0, 1]"),
            });
        }
        if self.router.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                field: "router.max_retries",
                reason: format!("{} exceeds {MAX_RETRIES_LIMIT}", self.router.max_retries),
            });
        }
        if self.router.history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "router.history_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.classifier.casual_confidence) {
            return Err(ConfigError::Invalid {
                field: "classifier.casual_confidence",
                reason: format!("{} is outside [0, 1]", self.classifier.casual_confidence),
            });
        }
        if self.workflow.max_steps == 0 {
            return Err(ConfigError::Invalid {
                field: "workflow.max_steps",
                reason: "must be greater than zero".into(),
            });
        }
        if self.integration.execution_history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "integration.execution_history_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// An existing file named by `AGENTFLOW_CONFIG` wins. Otherwise `start` and
/// each of its ancestors are checked for `agentflow.yaml`, nearest first.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    let explicit = std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .filter(|path| path.is_file());
    if let Some(path) = explicit {
        return Ok(path);
    }
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
        .ok_or(ConfigError::NotFound)
}

/// Load, interpolate, parse and validate the configuration file.
pub fn load_config(path: &Path) -> Result<AgentflowConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse configuration text (after env interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<AgentflowConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let config: AgentflowConfig = if interpolated.trim().is_empty() {
        AgentflowConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?
    };

    config.validate()?;
    Ok(config)
}

/// Load the config found from the current directory, or defaults when absent.
pub fn load_or_default() -> AgentflowConfig {
    let cwd = std::env::current_dir().unwrap_or_default();
    match find_config_path(&cwd) {
        Ok(path) => match load_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "config: loaded");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "config: invalid, using defaults");
                AgentflowConfig::default()
            }
        },
        Err(_) => AgentflowConfig::default(),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Substitute `${NAME}` and `${NAME:-fallback}` references from the environment.
///
/// An unset `NAME` without a fallback becomes the empty string. A `${` with no
/// closing brace is copied through untouched.
fn interpolate_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("${") {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let reference = &rest[open + 2..open + close];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(fallback.unwrap_or_default()),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert!((config.router.confidence_threshold - 0.7).abs() < f32::EPSILON);
        assert!(config.router.enable_fallback);
        assert_eq!(config.router.default_agent, AgentKind::GeneralAssistant);
        assert_eq!(config.workflow.max_steps, 50);
        assert_eq!(config.integration.capability_timeout_ms, 30_000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = r#"
            router:
              confidence_threshold: 0.5
              default_agent: code_assistant
            workflow:
              node_timeout_ms: 1500
        "#;
        let config = parse_config(yaml).unwrap();
        assert!((config.router.confidence_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.router.default_agent, AgentKind::CodeAssistant);
        assert_eq!(config.router.max_retries, 2);
        assert_eq!(config.workflow.node_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn custom_default_agent_is_accepted() {
        let config = parse_config("router:\n  default_agent: legal_reviewer\n").unwrap();
        assert_eq!(
            config.router.default_agent,
            AgentKind::Custom("legal_reviewer".into())
        );
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let err = parse_config("router:\n  confidence_threshold: 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "router.confidence_threshold", .. }));
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let err = parse_config("workflow:\n  max_steps: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "workflow.max_steps", .. }));
    }

    #[test]
    fn interpolates_env_var_with_default() {
        std::env::remove_var("__AGENTFLOW_TEST_UNSET__");
        let yaml = "router:\n  max_retries: ${__AGENTFLOW_TEST_UNSET__:-5}\n";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.router.max_retries, 5);
    }

    #[test]
    fn interpolates_env_var_with_value() {
        std::env::set_var("__AGENTFLOW_TEST_RETRIES__", "7");
        let yaml = "router:\n  max_retries: ${__AGENTFLOW_TEST_RETRIES__:-1}\n";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.router.max_retries, 7);
        std::env::remove_var("__AGENTFLOW_TEST_RETRIES__");
    }

    #[test]
    fn interpolate_leaves_plain_text_alone() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn interpolate_keeps_unterminated_reference() {
        std::env::remove_var("__AGENTFLOW_TEST_OPEN__");
        assert_eq!(
            interpolate_env_vars("a ${__AGENTFLOW_TEST_OPEN__} b ${oops"),
            "a  b ${oops"
        );
    }

    #[test]
    fn max_retries_above_limit_is_rejected() {
        let err = parse_config("router:\n  max_retries: 40\n  retry_base_delay_ms: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "router.max_retries", .. }));

        let config = parse_config("router:\n  max_retries: 16\n").unwrap();
        assert_eq!(config.router.max_retries, MAX_RETRIES_LIMIT);
    }

    #[test]
    fn find_config_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "router: {}\n").unwrap();

        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));

        let config = load_config(&found).unwrap();
        assert_eq!(config.router.history_capacity, 100);
    }

    #[test]
    fn load_config_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
