// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Adapters bridge the orchestrator to external AI coding agents.
//!
//! Every agent family speaks its own command line and JSON dialect;
//! adapters hide that behind one contract: [`Adapter::start`] launches
//! the work and returns a channel of protocol [`Event`]s, and
//! [`Adapter::shutdown`] terminates it. The [`registry::Registry`]
//! maps kind tags to factories so the driver can build adapters from
//! configuration alone.
//!
//! # Modules
//!
//! - [`process`] - Generic adapter that drives a local CLI process
//! - [`registry`] - Factory registry keyed by kind tag
//! - [`amp`], [`claude`], [`codex`] - Family presets over [`process`]

pub mod amp;
pub mod claude;
pub mod codex;
pub mod process;
pub mod registry;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::AgentConfig;
use crate::error::AdapterError;
use crate::protocol::Event;

/// The uniform contract wrapping an external agent as an event source.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Launches the agent against a worktree and returns its event
    /// stream.
    ///
    /// The call returns as soon as the underlying work is spawned;
    /// events arrive asynchronously on the channel, which the adapter
    /// closes exactly once when the work finishes, fails, or the token
    /// is cancelled.
    async fn start(
        &self,
        cancel: CancellationToken,
        worktree: &Path,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Event>, AdapterError>;

    /// Requests termination of any running work.
    ///
    /// Idempotent, a no-op before [`Adapter::start`], and safe to call
    /// concurrently with a reader of the event stream.
    async fn shutdown(&self) -> Result<(), AdapterError>;
}

/// A boxed adapter trait object.
pub type BoxedAdapter = Box<dyn Adapter>;

/// A factory builds an adapter from a resolved specification.
pub type Factory = Arc<dyn Fn(AdapterSpec) -> Result<BoxedAdapter, AdapterError> + Send + Sync>;

/// Resolved configuration handed to an adapter factory.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    /// Unique identifier for the adapter instance.
    pub id: String,
    /// Kind tag: `cli` or an adapter-family name.
    pub kind: String,
    /// Adapter-specific options from the configuration file.
    pub options: HashMap<String, serde_json::Value>,
}

impl AdapterSpec {
    /// Builds a spec from an agent's configuration record.
    pub fn from_agent(agent: &AgentConfig) -> Self {
        Self {
            id: agent.id.clone(),
            kind: agent.kind.clone(),
            options: agent.config.clone(),
        }
    }

    /// Reads a string option.
    pub fn str_option(&self, key: &str) -> Option<String> {
        self.options
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Reads an integer option, accepting plain or floating numbers.
    pub fn u64_option(&self, key: &str) -> Option<u64> {
        let value = self.options.get(key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().map(|f| f as u64))
    }

    /// Reads a list-of-strings option; non-string entries are skipped.
    pub fn str_list_option(&self, key: &str) -> Vec<String> {
        self.options
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Warns about option keys this adapter does not understand.
    ///
    /// Unknown keys are tolerated so new options can roll out without
    /// breaking older configurations.
    pub fn warn_unknown_options(&self, known: &[&str]) {
        for key in self.options.keys() {
            if !known.contains(&key.as_str()) {
                warn!(agent_id = %self.id, option = %key, "ignoring unknown adapter option");
            }
        }
    }
}
