// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Patch evaluation and winner selection.
//!
//! The arbitrator scores every candidate patch against a baseline test
//! run. Scoring is a pure function of the comparison verdict, the diff
//! statistics, and the candidate's test result: no clocks, randomness,
//! or agent identity feed into it. Candidate order matters only for
//! breaking ties, where the first-seen candidate wins.
//!
//! A candidate moves through: received, then either no-tests (empty or
//! conflicted diff), dropped (its evaluation errored), or scored.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ArbitratorError;
use crate::git::diff::{self, DiffStats};
use crate::protocol::Event;
use crate::runner::{self, TestResult, TestRunner};

/// One agent's finished contribution, ready for evaluation.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The agent that produced this patch.
    pub agent_id: String,
    /// The worktree holding the patched checkout.
    pub worktree_path: PathBuf,
    /// Unified diff against the base revision.
    pub diff: String,
    /// Every event the agent emitted during the run.
    pub events: Vec<Event>,
}

/// A candidate patch with its evaluation attached.
#[derive(Debug, Clone)]
pub struct PatchResult {
    /// The agent that produced this patch.
    pub agent_id: String,
    /// Unified diff against the base revision.
    pub diff: String,
    /// Statistics computed from the diff.
    pub stats: DiffStats,
    /// Test outcome in the patched worktree; absent when the tests
    /// were skipped (empty or conflicted diff).
    pub test_result: Option<TestResult>,
    /// Every event the agent emitted during the run.
    pub events: Vec<Event>,
    /// Numeric evaluation; higher is better.
    pub score: i64,
    /// Human-readable explanation for the score.
    pub reason: String,
}

/// Evaluates candidate patches against a baseline test result.
pub struct Arbitrator {
    runner: TestRunner,
    base_repo: PathBuf,
    baseline: Option<TestResult>,
}

impl Arbitrator {
    /// Creates an arbitrator bound to a test runner and the base
    /// repository.
    pub fn new(runner: TestRunner, base_repo: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            base_repo: base_repo.into(),
            baseline: None,
        }
    }

    /// Runs the test command in the base repository and stores the
    /// result as the comparison floor. Must be called before any
    /// [`Arbitrator::evaluate`].
    pub async fn set_baseline(&mut self, cancel: &CancellationToken) -> Result<(), ArbitratorError> {
        let result = self.runner.run(cancel, &self.base_repo).await?;
        info!(summary = %runner::format(&result), "baseline established");
        self.baseline = Some(result);
        Ok(())
    }

    /// Installs a precomputed baseline, e.g. from a cached run.
    pub fn set_baseline_result(&mut self, result: TestResult) {
        self.baseline = Some(result);
    }

    /// The stored baseline, if one has been set.
    pub fn baseline(&self) -> Option<&TestResult> {
        self.baseline.as_ref()
    }

    /// Evaluates a single candidate.
    pub async fn evaluate(
        &self,
        cancel: &CancellationToken,
        candidate: &Candidate,
    ) -> Result<PatchResult, ArbitratorError> {
        let baseline = self.baseline.as_ref().ok_or(ArbitratorError::NoBaseline)?;

        // A patch with no changes earns nothing and skips the tests.
        if candidate.diff.trim().is_empty() {
            return Ok(PatchResult {
                agent_id: candidate.agent_id.clone(),
                diff: String::new(),
                stats: DiffStats::default(),
                test_result: None,
                events: candidate.events.clone(),
                score: 0,
                reason: "No changes made".to_string(),
            });
        }

        let stats = diff::stats(&candidate.diff);

        // Conflicted patches are rejected outright, tests unrun.
        if stats.has_conflicts {
            return Ok(PatchResult {
                agent_id: candidate.agent_id.clone(),
                diff: candidate.diff.clone(),
                stats,
                test_result: None,
                events: candidate.events.clone(),
                score: -10,
                reason: "Patch contains merge conflicts".to_string(),
            });
        }

        let test_result = self.runner.run(cancel, &candidate.worktree_path).await?;
        let (improved, reason) = runner::compare(baseline, &test_result);
        let score = score(improved, &stats, &test_result);

        Ok(PatchResult {
            agent_id: candidate.agent_id.clone(),
            diff: candidate.diff.clone(),
            stats,
            test_result: Some(test_result),
            events: candidate.events.clone(),
            score,
            reason,
        })
    }

    /// Evaluates every candidate and returns the highest scorer.
    ///
    /// Candidates whose evaluation errors are dropped with a warning;
    /// ties go to the first-seen candidate. Fails only when no
    /// candidate could be scored at all.
    pub async fn select_best(
        &self,
        cancel: &CancellationToken,
        candidates: &[Candidate],
    ) -> Result<PatchResult, ArbitratorError> {
        if candidates.is_empty() {
            return Err(ArbitratorError::NoCandidates);
        }

        let mut best: Option<PatchResult> = None;
        for candidate in candidates {
            let result = match self.evaluate(cancel, candidate).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(agent_id = %candidate.agent_id, error = %e, "dropping candidate");
                    continue;
                }
            };

            info!(
                agent_id = %result.agent_id,
                score = result.score,
                reason = %result.reason,
                "evaluated candidate"
            );

            match &best {
                Some(current) if result.score <= current.score => {}
                _ => best = Some(result),
            }
        }

        best.ok_or(ArbitratorError::AllFailed)
    }
}

/// Computes the additive score for a candidate.
pub fn score(improved: bool, stats: &DiffStats, test_result: &TestResult) -> i64 {
    let mut score: i64 = 0;

    if improved {
        score += 100;
    }

    if test_result.success {
        score += 50;
    }

    score += test_result.passed as i64 * 5;
    score -= test_result.failed as i64 * 10;

    // Nudge toward minimal patches.
    let total_changes = stats.total_changes();
    if total_changes > 0 && total_changes <= 10 {
        score += 5;
    } else if total_changes > 50 {
        score -= 5;
    }

    if test_result.success && total_changes < 20 {
        score += 10;
    }

    score
}

/// Renders a human-readable summary of a patch result.
pub fn format_patch_result(result: &PatchResult) -> String {
    let mut out = String::new();

    out.push_str(&format!("Agent: {}\n", result.agent_id));
    out.push_str(&format!("Score: {} ({})\n", result.score, result.reason));

    if result.stats.files_changed > 0 {
        out.push_str(&format!(
            "Changes: {} files modified, {} lines added, {} lines removed\n",
            result.stats.files_changed, result.stats.lines_added, result.stats.lines_removed
        ));
    }

    if let Some(tests) = &result.test_result {
        out.push_str(&format!(
            "Tests: {} total, {} passed, {} failed\n",
            tests.total, tests.passed, tests.failed
        ));
    }

    out
}
