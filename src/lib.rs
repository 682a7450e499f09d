// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Gauntlet - race AI coding agents, let the tests pick the winner.
//!
//! Given a git repository, a task prompt, and a test command, Gauntlet
//! runs several external CLI coding agents concurrently, each in its
//! own git worktree, streams their activity events, re-runs the test
//! suite against every candidate patch, and deterministically selects
//! the best one.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`protocol`] - Typed events and the newline-delimited JSON codec
//! - [`git`] - Worktree isolation and diff utilities
//! - [`adapter`] - The agent contract, registry, and family presets
//! - [`runner`] - Test execution and result comparison
//! - [`watchdog`] - Per-agent token and time ceilings
//! - [`arbitrator`] - Candidate scoring and winner selection
//! - [`orchestrator`] - The fan-out driver tying it all together
//! - [`config`] - YAML configuration loading and validation
//! - [`error`] - Error types and result aliases
//! - [`telemetry`] - Tracing initialization

pub mod adapter;
pub mod arbitrator;
pub mod config;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod protocol;
pub mod runner;
pub mod telemetry;
pub mod watchdog;

// Re-export commonly used types at crate root.
pub use adapter::{Adapter, BoxedAdapter};
pub use arbitrator::{Arbitrator, Candidate, PatchResult};
pub use config::{AgentConfig, Config};
pub use error::{
    AdapterError, ArbitratorError, ConfigError, ProtocolError, Result, RunnerError, WorktreeError,
};
pub use git::{DiffStats, WorktreeManager};
pub use orchestrator::Orchestrator;
pub use protocol::{Event, EventKind};
pub use runner::{TestResult, TestRunner};
pub use watchdog::{ResourceLimits, TokenCounter, Watchdog};

/// Gauntlet version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _event = Event::new(EventKind::Complete, "agent", 1);
        let _stats = DiffStats::default();
    }
}
