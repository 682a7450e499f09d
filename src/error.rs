// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Gauntlet orchestrator.
//!
//! This module provides strongly-typed errors for each subsystem,
//! using `thiserror` for ergonomic error definitions and `anyhow` for
//! propagation at the driver level.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol events.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to decode event: {0}")]
    Decode(String),

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("failed to serialize payload: {0}")]
    Payload(String),

    #[error("event is not a {expected} event, got {actual}")]
    WrongKind { expected: String, actual: String },

    #[error("event has no payload")]
    MissingPayload,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors that can occur during worktree operations.
#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("invalid git repository at {0}: {1}")]
    InvalidRepo(String, String),

    #[error("invalid worktree path: {0}")]
    InvalidWorktree(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("failed to clean up worktrees: {0}")]
    Cleanup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while constructing or running adapters.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("no adapter factory registered for kind: {0}")]
    UnknownKind(String),

    #[error("invalid adapter configuration for {id}: {message}")]
    InvalidConfig { id: String, message: String },

    #[error("{family} adapter requires the cli kind, got: {got}")]
    WrongKind { family: String, got: String },

    #[error("failed to spawn agent process: {0}")]
    Spawn(String),
}

/// Errors that can occur while running the test command.
///
/// A failing or unstartable test command is not a runner error; it is
/// reported through the returned `TestResult`.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("empty test command")]
    EmptyCommand,
}

/// Errors that can occur during patch evaluation and selection.
#[derive(Error, Debug)]
pub enum ArbitratorError {
    #[error("baseline test results not set; call set_baseline first")]
    NoBaseline,

    #[error("failed to run tests on patched code: {0}")]
    TestRun(#[from] RunnerError),

    #[error("no candidate patches to evaluate")]
    NoCandidates,

    #[error("all candidate patches failed evaluation")]
    AllFailed,
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("IO error reading config: {0}")]
    Io(String),

    #[error("YAML parsing error: {0}")]
    Yaml(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
