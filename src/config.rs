// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading and validation.
//!
//! The orchestrator is configured by a single YAML file naming the
//! working directory for worktrees, the agents to race, the test
//! command, and timeouts. Adapter-specific options stay a free-form
//! map; each adapter factory interprets (and warns about) its own keys.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default timeout when `timeout_seconds` is absent or non-positive.
const DEFAULT_TIMEOUT_SECS: i64 = 300;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-agent worktrees are created.
    #[serde(default)]
    pub working_dir: String,

    /// The agents to run against the task.
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Whitespace-tokenised command that runs the project's tests.
    #[serde(default)]
    pub test_command: String,

    /// Maximum time to wait for agent responses, in seconds.
    #[serde(default)]
    pub timeout_seconds: i64,

    /// Optional per-agent resource ceilings for the watchdog.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Configuration for a single agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier for the agent.
    #[serde(default)]
    pub id: String,

    /// Adapter kind tag: `cli` or an adapter-family name.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Adapter-specific options, passed through to the factory.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Resource ceilings enforced by the watchdog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    /// Maximum total tokens per agent; 0 disables the token ceiling.
    #[serde(default)]
    pub max_tokens: u64,

    /// Maximum wall-clock seconds per agent; 0 falls back to
    /// `timeout_seconds`.
    #[serde(default)]
    pub max_duration_seconds: u64,
}

impl Config {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    /// Parses and validates configuration from a YAML string.
    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The overall run timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds as u64)
    }

    /// The per-agent duration ceiling, defaulting to the run timeout.
    pub fn max_agent_duration(&self) -> Duration {
        if self.limits.max_duration_seconds > 0 {
            Duration::from_secs(self.limits.max_duration_seconds)
        } else {
            self.timeout()
        }
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.working_dir.is_empty() {
            return Err(ConfigError::MissingField("working_dir".to_string()));
        }

        if self.agents.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "agents".to_string(),
                message: "at least one agent must be configured".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "agents".to_string(),
                    message: format!("agent at index {i} is missing id"),
                });
            }
            if agent.kind.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "agents".to_string(),
                    message: format!("agent '{}' is missing type", agent.id),
                });
            }
            if !seen.insert(agent.id.clone()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }

        if self.timeout_seconds <= 0 {
            self.timeout_seconds = DEFAULT_TIMEOUT_SECS;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
working_dir: /tmp/gauntlet-work
test_command: cargo test
timeout_seconds: 120
limits:
  max_tokens: 50000
agents:
  - id: claude
    type: cli
    config:
      command: claude
      model: claude-sonnet-4-20250514
  - id: codex
    type: cli
    config:
      command: codex
      args: ["--fast"]
"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = Config::parse(FULL).unwrap();
        assert_eq!(cfg.working_dir, "/tmp/gauntlet-work");
        assert_eq!(cfg.agents.len(), 2);
        assert_eq!(cfg.agents[0].id, "claude");
        assert_eq!(cfg.agents[0].kind, "cli");
        assert_eq!(
            cfg.agents[0].config.get("model").and_then(|v| v.as_str()),
            Some("claude-sonnet-4-20250514")
        );
        assert_eq!(cfg.timeout(), Duration::from_secs(120));
        assert_eq!(cfg.limits.max_tokens, 50_000);
        // No explicit duration ceiling: falls back to the run timeout.
        assert_eq!(cfg.max_agent_duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_missing_working_dir_fails() {
        let result = Config::parse("agents:\n  - id: a\n    type: cli\n");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_empty_agents_fails() {
        let result = Config::parse("working_dir: /tmp/w\nagents: []\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_without_id_fails() {
        let result = Config::parse("working_dir: /tmp/w\nagents:\n  - type: cli\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_without_type_fails() {
        let result = Config::parse("working_dir: /tmp/w\nagents:\n  - id: a\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_agent_ids_fail() {
        let yaml = "working_dir: /tmp/w\nagents:\n  - id: a\n    type: cli\n  - id: a\n    type: cli\n";
        assert!(matches!(
            Config::parse(yaml),
            Err(ConfigError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_timeout_defaults() {
        let yaml = "working_dir: /tmp/w\nagents:\n  - id: a\n    type: cli\n";
        let cfg = Config::parse(yaml).unwrap();
        assert_eq!(cfg.timeout_seconds, 300);

        let yaml = "working_dir: /tmp/w\ntimeout_seconds: -5\nagents:\n  - id: a\n    type: cli\n";
        let cfg = Config::parse(yaml).unwrap();
        assert_eq!(cfg.timeout_seconds, 300);
    }

    #[test]
    fn test_explicit_duration_ceiling() {
        let yaml = "working_dir: /tmp/w\ntimeout_seconds: 60\nlimits:\n  max_duration_seconds: 30\nagents:\n  - id: a\n    type: cli\n";
        let cfg = Config::parse(yaml).unwrap();
        assert_eq!(cfg.max_agent_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/gauntlet.yaml"),
            Err(ConfigError::NotFound(_))
        ));
    }
}
