// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Claude Code family preset: resolves the `claude` binary, the
//! stream-json output format, and model/token options, then delegates
//! to the process adapter.

use std::sync::Arc;

use super::process::ProcessAdapter;
use super::{AdapterSpec, BoxedAdapter, Factory};
use crate::error::AdapterError;

/// Kind tag this family registers under.
pub const KIND: &str = "claude";

/// Default binary name.
const DEFAULT_BINARY: &str = "claude";

/// Arguments every Claude invocation gets.
const DEFAULT_ARGS: [&str; 2] = ["--output-format", "stream-json"];

/// Option keys this family understands.
const KNOWN_OPTIONS: [&str; 5] = ["binary_path", "model", "max_tokens", "args", "command"];

/// Builds a Claude adapter from adapter options.
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

    if let Some(max_tokens) = spec.u64_option("max_tokens") {
        if max_tokens > 0 {
            args.push("--max-tokens".to_string());
            args.push(max_tokens.to_string());
        }
    }

    args.extend(spec.str_list_option("args"));

    Box::new(ProcessAdapter::new(&spec.id, command, args))
}

/// Factory for the registry. Rejects specs whose kind is not `cli`;
/// Claude is a preset over the CLI transport, not a transport itself.
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
