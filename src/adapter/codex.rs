// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Codex family preset: resolves the `codex` binary, its `run`
//! subcommand with stream-json output, and the model option, then
//! delegates to the process adapter.

use std::sync::Arc;

use super::process::ProcessAdapter;
use super::{AdapterSpec, BoxedAdapter, Factory};
use crate::error::AdapterError;

/// Kind tag this family registers under.
pub const KIND: &str = "codex";

/// Default binary name.
const DEFAULT_BINARY: &str = "codex";

/// Arguments every Codex invocation gets.
const DEFAULT_ARGS: [&str; 3] = ["run", "--output-format", "stream-json"];

/// Option keys this family understands.
const KNOWN_OPTIONS: [&str; 4] = ["binary_path", "model", "args", "command"];

/// Builds a Codex adapter from adapter options.
pub fn new(spec: &AdapterSpec) -> BoxedAdapter {
    spec.warn_unknown_options(&KNOWN_OPTIONS);

    let command = spec
        .str_option("binary_path")
        .unwrap_or_else(|| DEFAULT_BINARY.to_string());

    let mut args: Vec<String> = DEFAULT_ARGS.iter().map(|s| s.to_string()).collect();

    if let Some(model) = spec.str_option("model") {
        args.push("--model".to_string());
        args.push(model);
    }

    args.extend(spec.str_list_option("args"));

    Box::new(ProcessAdapter::new(&spec.id, command, args))
}

/// Factory for the registry. Rejects specs whose kind is not `cli`;
/// Codex is a preset over the CLI transport, not a transport itself.
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
