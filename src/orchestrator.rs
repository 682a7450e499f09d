// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The fan-out driver.
//!
//! The orchestrator wires everything together for one run: it
//! establishes the baseline test result, builds one adapter per
//! configured agent, gives each agent an isolated worktree, collects
//! every event stream to completion, and hands the assembled
//! candidates to the arbitrator.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Orchestrator                     │
//! │   baseline ── fan out ── collect ── select winner    │
//! └──────┬──────────┬──────────┬──────────────┬──────────┘
//!        │          │          │              │
//!   ┌────▼───┐ ┌────▼───┐ ┌────▼───┐    ┌─────▼─────┐
//!   │ agent  │ │ agent  │ │ agent  │    │ watchdog  │
//!   │ + tree │ │ + tree │ │ + tree │    │ (periodic)│
//!   └────────┘ └────────┘ └────────┘    └───────────┘
//! ```
//!
//! Cancellation flows down a token hierarchy: the root token (SIGINT)
//! cancels the run token (which also has the configured deadline), and
//! the run token parents one token per agent so the watchdog can
//! terminate a single agent without disturbing the rest.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::registry::Registry;
use crate::adapter::BoxedAdapter;
use crate::arbitrator::{Arbitrator, Candidate, PatchResult};
use crate::config::Config;
use crate::error::Result;
use crate::git::WorktreeManager;
use crate::runner::TestRunner;
use crate::watchdog::{ResourceLimits, Watchdog};

/// How often the watchdog evaluates limits.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Buffered watchdog signals in flight.
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Drives one full orchestration run.
pub struct Orchestrator {
    config: Config,
    repo_path: PathBuf,
    registry: Registry,
}

impl Orchestrator {
    /// Creates an orchestrator for a validated configuration and a
    /// repository path.
    pub fn new(config: Config, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            repo_path: repo_path.into(),
            registry: Registry::with_builtins(),
        }
    }

    /// Replaces the adapter registry, e.g. to add custom factories.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Runs every configured agent against `prompt` and returns the
    /// winning patch.
    pub async fn run(&self, cancel: CancellationToken, prompt: &str) -> Result<PatchResult> {
        let manager = Arc::new(
            WorktreeManager::new(&self.repo_path, &self.config.working_dir)
                .await
                .context("failed to create worktree manager")?,
        );

        let outcome = self.run_inner(&cancel, prompt, Arc::clone(&manager)).await;

        if let Err(e) = manager.cleanup().await {
            warn!(error = %e, "worktree cleanup failed");
        }

        outcome
    }

    async fn run_inner(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        manager: Arc<WorktreeManager>,
    ) -> Result<PatchResult> {
        let runner = TestRunner::new(&self.config.test_command, self.config.timeout());
        let mut arbitrator = Arbitrator::new(runner, &self.repo_path);

        info!("running baseline tests");
        arbitrator
            .set_baseline(cancel)
            .await
            .context("failed to run baseline tests")?;

        let adapters = self
            .registry
            .create_all(&self.config)
            .context("failed to create adapters")?;

        let watchdog = Arc::new(Watchdog::new(ResourceLimits {
            max_tokens: self.config.limits.max_tokens,
            max_duration: self.config.max_agent_duration(),
        }));

        // The run token carries the overall deadline; every agent gets
        // a child of it so the watchdog can terminate one agent alone.
        let run_token = cancel.child_token();
        let deadline_token = run_token.clone();
        let deadline = self.config.timeout();
        let deadline_task = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!("run deadline reached, cancelling agents");
            deadline_token.cancel();
        });

        let agent_tokens: HashMap<String, CancellationToken> = adapters
            .iter()
            .map(|(id, _)| (id.clone(), run_token.child_token()))
            .collect();

        let (warning_tx, warning_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (terminate_tx, terminate_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        let watchdog_loop = Arc::clone(&watchdog);
        let watchdog_token = run_token.clone();
        let watchdog_task = tokio::spawn(async move {
            watchdog_loop
                .run_periodic(watchdog_token, WATCHDOG_INTERVAL, warning_tx, terminate_tx)
                .await;
        });

        let signal_task = tokio::spawn(drain_watchdog_signals(
            warning_rx,
            terminate_rx,
            agent_tokens.clone(),
            Arc::clone(&watchdog),
        ));

        info!(agents = adapters.len(), prompt, "starting agents");
        let mut join_set = JoinSet::new();
        for (index, (agent_id, adapter)) in adapters.into_iter().enumerate() {
            let token = agent_tokens[&agent_id].clone();
            join_set.spawn(run_agent(
                index,
                agent_id,
                adapter,
                token,
                Arc::clone(&manager),
                Arc::clone(&watchdog),
                prompt.to_string(),
            ));
        }

        let mut indexed: Vec<(usize, Candidate)> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(candidate)) => indexed.push(candidate),
                Ok(None) => {}
                Err(e) => error!(error = %e, "agent task panicked"),
            }
        }

        // Agents are done: stop the deadline and the watchdog loop,
        // which in turn ends the signal drain.
        deadline_task.abort();
        run_token.cancel();
        watchdog_task.await.ok();
        signal_task.await.ok();

        // Candidates are scored in configuration order so tie-breaks
        // stay deterministic regardless of completion order.
        indexed.sort_by_key(|(index, _)| *index);
        let candidates: Vec<Candidate> =
            indexed.into_iter().map(|(_, candidate)| candidate).collect();

        info!(candidates = candidates.len(), "evaluating patches");
        let winner = arbitrator
            .select_best(cancel, &candidates)
            .await
            .context("failed to select best patch")?;

        Ok(winner)
    }
}

/// Runs one agent to completion and assembles its candidate.
///
/// Per-agent failures (worktree creation, spawn, diff extraction) drop
/// the agent and let the rest of the run continue.
async fn run_agent(
    index: usize,
    agent_id: String,
    adapter: BoxedAdapter,
    token: CancellationToken,
    manager: Arc<WorktreeManager>,
    watchdog: Arc<Watchdog>,
    prompt: String,
) -> Option<(usize, Candidate)> {
    watchdog.monitor(&agent_id);

    let worktree = match manager.create(&agent_id, "").await {
        Ok(path) => path,
        Err(e) => {
            error!(%agent_id, error = %e, "failed to create worktree");
            return None;
        }
    };

    let mut rx = match adapter.start(token.clone(), &worktree, &prompt).await {
        Ok(rx) => rx,
        Err(e) => {
            error!(%agent_id, error = %e, "failed to start agent");
            return None;
        }
    };

    let mut events = Vec::new();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    debug!(%agent_id, kind = %event.kind, seq = event.sequence_num, "event");
                    watchdog.track(&event);
                    events.push(event);
                }
                None => break,
            },
            _ = token.cancelled() => break,
        }
    }

    if let Err(e) = adapter.shutdown().await {
        warn!(%agent_id, error = %e, "error shutting down agent");
    }
    watchdog.stop(&agent_id);

    let diff = match manager.get_diff(&worktree).await {
        Ok(diff) => diff,
        Err(e) => {
            error!(%agent_id, error = %e, "failed to get diff");
            return None;
        }
    };

    debug!(%agent_id, events = events.len(), diff_bytes = diff.len(), "agent finished");
    Some((
        index,
        Candidate {
            agent_id,
            worktree_path: worktree,
            diff,
            events,
        },
    ))
}

/// Logs watchdog warnings and cancels agents the watchdog wants
/// terminated. Ends when the watchdog loop drops its senders.
async fn drain_watchdog_signals(
    mut warning_rx: mpsc::Receiver<crate::protocol::Event>,
    mut terminate_rx: mpsc::Receiver<String>,
    agent_tokens: HashMap<String, CancellationToken>,
    watchdog: Arc<Watchdog>,
) {
    loop {
        tokio::select! {
            warning = warning_rx.recv() => match warning {
                Some(event) => {
                    if let Ok(payload) = event.watchdog_payload() {
                        warn!(
                            agent_id = %payload.agent_id,
                            reason = %payload.reason,
                            "resource warning"
                        );
                    }
                }
                None => break,
            },
            agent_id = terminate_rx.recv() => match agent_id {
                Some(agent_id) => {
                    warn!(%agent_id, "resource limit breached, terminating agent");
                    if let Some(token) = agent_tokens.get(&agent_id) {
                        token.cancel();
                    }
                    watchdog.stop(&agent_id);
                }
                None => break,
            },
        }
    }
}
