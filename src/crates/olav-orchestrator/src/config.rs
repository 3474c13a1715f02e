//! Configuration for the orchestration layer.
//!
//! Loaded from YAML; every section carries serde defaults so a partial
//! file (or none at all) yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use olav_core::EngineLimits;

use crate::{OrchestratorError, Result};

/// Intent router tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Candidates forwarded to LLM classification
    pub top_k: usize,

    /// Embedding similarity above which routing short-circuits
    pub tau: f32,

    /// Minimum classifier confidence before falling back
    pub confidence_floor: f32,

    /// Workflow used when both stages decline
    pub default_workflow: String,

    /// Additive score for descriptor keyword matches
    pub keyword_boost: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            tau: 0.78,
            confidence_floor: 0.5,
            default_workflow: "query".to_string(),
            keyword_boost: 0.05,
        }
    }
}

/// HITL gate policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Argument tokens that force high risk
    pub high_risk_patterns: Vec<String>,

    /// Fields dispatchable without raising risk
    pub whitelist: Vec<String>,

    /// Fields that raise risk to at least medium
    pub graylist: Vec<String>,

    /// Fields that block dispatch at high risk even with approval
    pub blacklist: Vec<String>,

    /// Use LLM field-level classification when a model is configured
    pub llm_classification: bool,

    /// Synthesize a rejection after this many seconds without a decision
    pub decision_timeout_secs: Option<u64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            high_risk_patterns: vec![
                "reload".to_string(),
                "erase".to_string(),
                "shutdown".to_string(),
                "delete".to_string(),
                "commit".to_string(),
            ],
            whitelist: vec!["description".to_string(), "mtu".to_string()],
            graylist: vec!["ip_address".to_string(), "vlan".to_string()],
            blacklist: vec!["boot_system".to_string(), "erase_config".to_string()],
            llm_classification: true,
            decision_timeout_secs: None,
        }
    }
}

/// Deep-dive workflow tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepDiveConfig {
    /// Parallel dispatch cap within a batch
    pub fan_out: usize,

    /// Maximum recursive descent depth
    pub max_depth: u32,

    /// Replans allowed after a dependency cycle
    pub replan_limit: u32,
}

impl Default for DeepDiveConfig {
    fn default() -> Self {
        Self {
            fan_out: 5,
            max_depth: 3,
            replan_limit: 1,
        }
    }
}

/// Engine timeouts and buffers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-tool call deadline in seconds
    pub tool_timeout_secs: u64,

    /// Node duration that triggers a warning
    pub node_soft_timeout_secs: u64,

    /// Node duration that aborts the run
    pub node_hard_timeout_secs: u64,

    /// Grace for in-flight tool calls after cancel
    pub drain_timeout_secs: u64,

    /// Event channel capacity
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            node_soft_timeout_secs: 120,
            node_hard_timeout_secs: 600,
            drain_timeout_secs: 10,
            event_buffer: olav_core::DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Convert to the engine's limit set
    pub fn limits(&self) -> EngineLimits {
        EngineLimits {
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            node_soft_timeout: Duration::from_secs(self.node_soft_timeout_secs),
            node_hard_timeout: Duration::from_secs(self.node_hard_timeout_secs),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OlavConfig {
    pub router: RouterConfig,
    pub gate: GateConfig,
    pub deepdive: DeepDiveConfig,
    pub engine: EngineConfig,
}

impl OlavConfig {
    /// Parse from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| OrchestratorError::Config(format!("invalid YAML: {}", e)))
    }

    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrchestratorError::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OlavConfig::default();
        assert_eq!(config.router.top_k, 3);
        assert!((config.router.tau - 0.78).abs() < f32::EPSILON);
        assert_eq!(config.deepdive.fan_out, 5);
        assert_eq!(config.deepdive.max_depth, 3);
        assert!(config
            .gate
            .high_risk_patterns
            .contains(&"shutdown".to_string()));
        assert!(config.gate.decision_timeout_secs.is_none());
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let config = OlavConfig::from_yaml(
            r#"
router:
  tau: 0.9
  default_workflow: inventory
deepdive:
  fan_out: 2
"#,
        )
        .unwrap();

        assert!((config.router.tau - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.router.default_workflow, "inventory");
        assert_eq!(config.router.top_k, 3);
        assert_eq!(config.deepdive.fan_out, 2);
        assert_eq!(config.deepdive.max_depth, 3);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(OlavConfig::from_yaml("router: [not, a, map]").is_err());
    }

    #[test]
    fn test_engine_limits_conversion() {
        let config = EngineConfig {
            tool_timeout_secs: 5,
            ..Default::default()
        };
        assert_eq!(config.limits().tool_timeout, Duration::from_secs(5));
    }
}
