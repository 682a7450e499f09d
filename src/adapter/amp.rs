// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Amp family preset: resolves the `amp` binary and its JSON output
//! flag, then delegates to the process adapter.

use std::sync::Arc;

use super::process::ProcessAdapter;
use super::{AdapterSpec, BoxedAdapter, Factory};
use crate::error::AdapterError;

/// Kind tag this family registers under.
pub const KIND: &str = "amp";

/// Default binary name.
const DEFAULT_BINARY: &str = "amp";

/// Arguments every Amp invocation gets.
const DEFAULT_ARGS: [&str; 1] = ["--json-output"];

/// Option keys this family understands.
const KNOWN_OPTIONS: [&str; 3] = ["binary_path", "args", "command"];

/// Builds an Amp adapter from adapter options.
pub fn new(spec: &AdapterSpec) -> BoxedAdapter {
    spec.warn_unknown_options(&KNOWN_OPTIONS);

    let command = spec
        .str_option("binary_path")
        .unwrap_or_else(|| DEFAULT_BINARY.to_string());

    let mut args: Vec<String> = DEFAULT_ARGS.iter().map(|s| s.to_string()).collect();
    args.extend(spec.str_list_option("args"));

    Box::new(ProcessAdapter::new(&spec.id, command, args))
}

/// Factory for the registry. Rejects specs whose kind is not `cli`;
/// Amp is a preset over the CLI transport, not a transport itself.
pub fn factory() -> Factory {
    Arc::new(|spec: AdapterSpec| {
        if spec.kind != "cli" {
            return Err(AdapterError::WrongKind {
                family: KIND.to_string(),
                got: spec.kind,
            });
        }
        Ok(new(&spec))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str, options: &[(&str, serde_json::Value)]) -> AdapterSpec {
        AdapterSpec {
            id: "amp".to_string(),
            kind: kind.to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_factory_requires_cli_kind() {
        let result = (factory())(spec("amp", &[]));
        assert!(matches!(result, Err(AdapterError::WrongKind { .. })));

        let result = (factory())(spec("cli", &[]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_new_builds_adapter() {
        // Construction succeeds with custom args and a binary override.
        let s = spec(
            "cli",
            &[
                ("binary_path", serde_json::json!("/opt/amp")),
                ("args", serde_json::json!(["--fast"])),
            ],
        );
        let _adapter = new(&s);
    }
}
