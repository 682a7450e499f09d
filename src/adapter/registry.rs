// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Factory registry mapping adapter kind tags to constructors.
//!
//! The driver never names concrete adapter types; it asks the registry
//! to build adapters from configuration records. Registrations happen
//! before the driver runs, but the registry is fully thread-safe.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{amp, claude, codex, process::ProcessAdapter};
use super::{AdapterSpec, BoxedAdapter, Factory};
use crate::config::Config;
use crate::error::AdapterError;

/// Registry of adapter factories keyed by kind tag.
pub struct Registry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with all built-in adapters registered:
    /// the generic `cli` transport plus the `amp`, `claude`, and
    /// `codex` family factories.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("cli", cli_factory());
        registry.register(amp::KIND, amp::factory());
        registry.register(claude::KIND, claude::factory());
        registry.register(codex::KIND, codex::factory());
        registry
    }

    /// Registers a factory for a kind tag, replacing any previous one.
    pub fn register(&self, kind: impl Into<String>, factory: Factory) {
        self.factories
            .write()
            .expect("registry lock poisoned")
            .insert(kind.into(), factory);
    }

    /// Instantiates an adapter for a spec.
    pub fn create(&self, spec: AdapterSpec) -> Result<BoxedAdapter, AdapterError> {
        let factory = {
            let factories = self.factories.read().expect("registry lock poisoned");
            factories
                .get(&spec.kind)
                .cloned()
                .ok_or_else(|| AdapterError::UnknownKind(spec.kind.clone()))?
        };
        factory(spec)
    }

    /// Builds every agent adapter from a validated configuration,
    /// preserving configuration order.
    pub fn create_all(&self, config: &Config) -> Result<Vec<(String, BoxedAdapter)>, AdapterError> {
        let mut adapters = Vec::with_capacity(config.agents.len());
        for agent in &config.agents {
            let spec = AdapterSpec::from_agent(agent);
            let adapter = self.create(spec).map_err(|e| AdapterError::InvalidConfig {
                id: agent.id.clone(),
                message: e.to_string(),
            })?;
            adapters.push((agent.id.clone(), adapter));
        }
        Ok(adapters)
    }

    /// Returns the registered kind tags, sorted for stable output.
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .factories
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The generic `cli` factory.
///
/// Agents whose id or `command` option names a known family are routed
/// to that family's preset; everything else needs an explicit
/// `command` option and gets a bare process adapter.
fn cli_factory() -> Factory {
    std::sync::Arc::new(|spec: AdapterSpec| {
        let command_opt = spec.str_option("command");
        let family_hint = |name: &str| spec.id == name || command_opt.as_deref() == Some(name);

        if family_hint(amp::KIND) {
            return Ok(amp::new(&spec));
        }
        if family_hint(codex::KIND) {
            return Ok(codex::new(&spec));
        }
        if family_hint(claude::KIND) {
            return Ok(claude::new(&spec));
        }

        let command = command_opt.ok_or_else(|| AdapterError::InvalidConfig {
            id: spec.id.clone(),
            message: "missing command for generic cli adapter".to_string(),
        })?;

        let args = spec.str_list_option("args");
        Ok(Box::new(ProcessAdapter::new(&spec.id, command, args)) as BoxedAdapter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, kind: &str, options: &[(&str, serde_json::Value)]) -> AdapterSpec {
        AdapterSpec {
            id: id.to_string(),
            kind: kind.to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_unknown_kind_fails() {
        let registry = Registry::with_builtins();
        let result = registry.create(spec("a", "http", &[]));
        assert!(matches!(result, Err(AdapterError::UnknownKind(_))));
    }

    #[test]
    fn test_registered_kinds() {
        let registry = Registry::with_builtins();
        let kinds = registry.registered_kinds();
        assert_eq!(kinds, vec!["amp", "claude", "cli", "codex"]);
    }

    #[test]
    fn test_cli_requires_command_for_unknown_agents() {
        let registry = Registry::with_builtins();
        let result = registry.create(spec("my-agent", "cli", &[]));
        assert!(matches!(result, Err(AdapterError::InvalidConfig { .. })));

        let result = registry.create(spec(
            "my-agent",
            "cli",
            &[("command", serde_json::json!("my-agent-bin"))],
        ));
        assert!(result.is_ok());
    }

    #[test]
    fn test_cli_routes_families_by_id_or_command() {
        let registry = Registry::with_builtins();
        assert!(registry.create(spec("claude", "cli", &[])).is_ok());
        assert!(registry
            .create(spec(
                "agent-2",
                "cli",
                &[("command", serde_json::json!("codex"))]
            ))
            .is_ok());
    }

    #[test]
    fn test_custom_registration_overrides() {
        let registry = Registry::new();
        registry.register(
            "cli",
            std::sync::Arc::new(|spec: AdapterSpec| {
                Ok(Box::new(ProcessAdapter::new(&spec.id, "true", Vec::new())) as BoxedAdapter)
            }),
        );
        assert!(registry.create(spec("anything", "cli", &[])).is_ok());
        assert_eq!(registry.registered_kinds(), vec!["cli"]);
    }

    #[test]
    fn test_create_all_preserves_order() {
        let yaml = r#"
working_dir: /tmp/w
agents:
  - id: second-agent
    type: cli
    config:
      command: echo
  - id: first-agent
    type: cli
    config:
      command: echo
"#;
        let config = Config::parse(yaml).unwrap();
        let registry = Registry::with_builtins();
        let adapters = registry.create_all(&config).unwrap();
        let ids: Vec<&str> = adapters.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["second-agent", "first-agent"]);
    }

    #[test]
    fn test_create_all_fails_on_bad_agent() {
        let yaml = r#"
working_dir: /tmp/w
agents:
  - id: ok-agent
    type: cli
    config:
      command: echo
  - id: broken-agent
    type: unknown-kind
"#;
        let config = Config::parse(yaml).unwrap();
        let registry = Registry::with_builtins();
        let result = registry.create_all(&config);
        assert!(matches!(result, Err(AdapterError::InvalidConfig { .. })));
    }
}
