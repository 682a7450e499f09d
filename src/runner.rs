// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Test execution and result comparison.
//!
//! The runner executes the project's test command inside a worktree,
//! captures combined output, and parses pass/fail counts. It
//! understands `ok<TAB>`/`FAIL<TAB>` package summary lines and
//! `test2json`-style JSON lines; when a harness produces neither, a
//! clean exit counts as a single passing test.
//!
//! A test command that fails is not a runner error: it is a property
//! of the candidate under evaluation, reported through [`TestResult`].

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RunnerError;

/// Default timeout when none is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Error string reported when the deadline fires before the test
/// command finishes.
const DEADLINE_ERROR: &str = "context deadline exceeded";

/// The outcome of one test command invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// True iff the command exited cleanly and no test failed.
    pub success: bool,
    /// Total number of tests counted.
    pub total: usize,
    /// Number of passing tests.
    pub passed: usize,
    /// Number of failing tests.
    pub failed: usize,
    /// Number of skipped tests.
    pub skipped: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Captured stdout and stderr, concatenated.
    pub output: String,
    /// Set when the run itself went wrong (non-zero exit, deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the configured test command in a worktree.
pub struct TestRunner {
    command: String,
    timeout: Duration,
}

impl TestRunner {
    /// Creates a new runner; a zero timeout falls back to five minutes.
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Executes the test command in `worktree` and parses the outcome.
    ///
    /// A deadline (runner timeout or cancelled token) produces a
    /// returned result whose error contains `context deadline
    /// exceeded`; it is never propagated as an error to the caller.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        worktree: &Path,
    ) -> Result<TestResult, RunnerError> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(RunnerError::EmptyCommand)?;
        let args: Vec<&str> = parts.collect();

        debug!(command = %self.command, worktree = %worktree.display(), "running tests");

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .current_dir(worktree)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(self.timeout, cmd.output()) => res.ok(),
        };
        let duration = start.elapsed();

        let result = match outcome {
            // Deadline fired or the run was cancelled; the dropped
            // future killed the child.
            None => TestResult {
                success: false,
                duration,
                error: Some(DEADLINE_ERROR.to_string()),
                ..TestResult::default()
            },
            Some(output) => match output {
                Ok(output) => {
                    let mut combined =
                        String::from_utf8_lossy(&output.stdout).into_owned();
                    combined.push_str(&String::from_utf8_lossy(&output.stderr));

                    let run_error = if output.status.success() {
                        None
                    } else {
                        Some(format!("test command failed: {}", output.status))
                    };
                    parse_output(&combined, duration, run_error)
                }
                // The command could not be started at all; still a
                // property of the candidate, not a runner failure.
                Err(e) => parse_output("", duration, Some(e.to_string())),
            },
        };

        Ok(result)
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Parses captured test output into counts.
fn parse_output(output: &str, duration: Duration, run_error: Option<String>) -> TestResult {
    let mut result = TestResult {
        success: run_error.is_none(),
        duration,
        output: output.to_string(),
        error: run_error,
        ..TestResult::default()
    };

    for line in output.lines() {
        // Package summary lines, e.g. "ok  \tpkg/path\t0.015s".
        if line.starts_with("ok\t") {
            result.total += 1;
            result.passed += 1;
        } else if line.starts_with("FAIL\t") {
            result.total += 1;
            result.failed += 1;
        }

        // test2json lines, e.g. {"Action":"pass","Test":"TestDivide"}.
        if line.contains("\"Test\":") {
            if let Ok(event) = serde_json::from_str::<serde_json::Value>(line) {
                match event.get("Action").and_then(|a| a.as_str()) {
                    Some("pass") => {
                        result.total += 1;
                        result.passed += 1;
                    }
                    Some("fail") => {
                        result.total += 1;
                        result.failed += 1;
                    }
                    Some("skip") => {
                        result.total += 1;
                        result.skipped += 1;
                    }
                    _ => {}
                }
            }
        }
    }

    // No machine-readable test lines but a clean exit: trust the exit
    // code and count a single passing test.
    if result.total == 0 && result.success {
        result.total = 1;
        result.passed = 1;
    }

    result.success = result.success && result.failed == 0;
    result
}

/// Produces a one-line human summary of a result.
pub fn format(result: &TestResult) -> String {
    let status = if result.success { "PASSED" } else { "FAILED" };
    let millis = Duration::from_millis(result.duration.as_millis() as u64);
    format!(
        "Tests {} ({} total, {} passed, {} failed, {} skipped) in {:?}",
        status, result.total, result.passed, result.failed, result.skipped, millis
    )
}

/// Compares two test results and reports whether the patch improved
/// the outcome, with a human-readable reason.
pub fn compare(before: &TestResult, after: &TestResult) -> (bool, String) {
    // Failing before, passing now.
    if !before.success && after.success {
        return (true, "Tests now passing".to_string());
    }

    // Still failing, but fewer failures.
    if !before.success && !after.success && after.failed < before.failed {
        return (
            true,
            format!(
                "Reduced failing tests from {} to {}",
                before.failed, after.failed
            ),
        );
    }

    // More tests passing.
    if after.passed > before.passed {
        return (
            true,
            format!(
                "Increased passing tests from {} to {}",
                before.passed, after.passed
            ),
        );
    }

    // Passing before and after.
    if before.success && after.success {
        return (
            false,
            "No change in test results, all tests still passing".to_string(),
        );
    }

    // Failing before and after with identical counts.
    if !before.success
        && !after.success
        && before.failed == after.failed
        && before.passed == after.passed
    {
        return (
            false,
            "No change in test results, same failures".to_string(),
        );
    }

    // Passing before, failing now.
    if before.success && !after.success {
        return (
            false,
            "Tests now failing, patch introduces regression".to_string(),
        );
    }

    (false, "No significant change in test results".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(success: bool, passed: usize, failed: usize) -> TestResult {
        TestResult {
            success,
            total: passed + failed,
            passed,
            failed,
            ..TestResult::default()
        }
    }

    #[test]
    fn test_parse_package_summary_lines() {
        let output = "ok\tpkg/a\t0.01s\nFAIL\tpkg/b\t0.02s\nok\tpkg/c\t0.03s\n";
        let parsed = parse_output(output, Duration::from_secs(1), None);
        assert_eq!(parsed.total, 3);
        assert_eq!(parsed.passed, 2);
        assert_eq!(parsed.failed, 1);
        assert!(!parsed.success);
    }

    #[test]
    fn test_parse_test2json_lines() {
        let output = concat!(
            "{\"Action\":\"pass\",\"Test\":\"TestA\"}\n",
            "{\"Action\":\"fail\",\"Test\":\"TestB\"}\n",
            "{\"Action\":\"skip\",\"Test\":\"TestC\"}\n",
            "{\"Action\":\"run\",\"Test\":\"TestD\"}\n",
        );
        let parsed = parse_output(output, Duration::from_secs(1), None);
        assert_eq!(parsed.total, 3);
        assert_eq!(parsed.passed, 1);
        assert_eq!(parsed.failed, 1);
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn test_parse_synthesizes_single_pass_on_clean_exit() {
        let parsed = parse_output("all good, nothing machine readable", Duration::ZERO, None);
        assert_eq!(parsed.total, 1);
        assert_eq!(parsed.passed, 1);
        assert!(parsed.success);
    }

    #[test]
    fn test_parse_no_synthesis_on_failed_exit() {
        let parsed = parse_output("", Duration::ZERO, Some("exit status 1".to_string()));
        assert_eq!(parsed.total, 0);
        assert!(!parsed.success);
        assert_eq!(parsed.error.as_deref(), Some("exit status 1"));
    }

    #[tokio::test]
    async fn test_empty_command_fails_early() {
        let runner = TestRunner::new("   ", Duration::from_secs(1));
        let result = runner
            .run(&CancellationToken::new(), Path::new("/tmp"))
            .await;
        assert!(matches!(result, Err(RunnerError::EmptyCommand)));
    }

    #[tokio::test]
    async fn test_clean_exit_passes() {
        let tmp = tempdir().unwrap();
        let runner = TestRunner::new("true", Duration::from_secs(5));
        let result = runner
            .run(&CancellationToken::new(), tmp.path())
            .await
            .expect("run");
        assert!(result.success);
        assert_eq!(result.passed, 1);
    }

    #[tokio::test]
    async fn test_failing_exit_reported() {
        let tmp = tempdir().unwrap();
        let runner = TestRunner::new("false", Duration::from_secs(5));
        let result = runner
            .run(&CancellationToken::new(), tmp.path())
            .await
            .expect("run");
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_output_parsed_from_script() {
        let tmp = tempdir().unwrap();
        let script = tmp.path().join("tests.sh");
        tokio::fs::write(&script, "printf 'ok\\tpkg/a\\t0.01s\\nFAIL\\tpkg/b\\t0.02s\\n'\nexit 1\n")
            .await
            .unwrap();

        let runner = TestRunner::new(
            format!("sh {}", script.display()),
            Duration::from_secs(5),
        );
        let result = runner
            .run(&CancellationToken::new(), tmp.path())
            .await
            .expect("run");
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.success);
        assert!(result.output.contains("pkg/a"));
    }

    #[tokio::test]
    async fn test_timeout_returns_deadline_result() {
        let tmp = tempdir().unwrap();
        let runner = TestRunner::new("sleep 30", Duration::from_millis(500));
        let start = Instant::now();
        let result = runner
            .run(&CancellationToken::new(), tmp.path())
            .await
            .expect("run must not propagate the deadline");
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("context deadline exceeded"));
    }

    #[tokio::test]
    async fn test_cancelled_token_returns_deadline_result() {
        let tmp = tempdir().unwrap();
        let runner = TestRunner::new("sleep 30", Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner.run(&cancel, tmp.path()).await.expect("run");
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("context deadline exceeded"));
    }

    #[test]
    fn test_format_summary() {
        let mut r = result(true, 3, 0);
        r.duration = Duration::from_millis(1234);
        let line = format(&r);
        assert!(line.contains("PASSED"));
        assert!(line.contains("3 passed"));
    }

    #[test]
    fn test_compare_now_passing() {
        let (improved, reason) = compare(&result(false, 1, 2), &result(true, 3, 0));
        assert!(improved);
        assert_eq!(reason, "Tests now passing");
    }

    #[test]
    fn test_compare_fewer_failures() {
        let (improved, reason) = compare(&result(false, 1, 3), &result(false, 1, 1));
        assert!(improved);
        assert!(reason.contains("Reduced failing tests from 3 to 1"));
    }

    #[test]
    fn test_compare_more_passing() {
        let (improved, reason) = compare(&result(true, 2, 0), &result(true, 4, 0));
        assert!(improved);
        assert!(reason.contains("Increased passing tests from 2 to 4"));
    }

    #[test]
    fn test_compare_no_change_passing() {
        let (improved, reason) = compare(&result(true, 2, 0), &result(true, 2, 0));
        assert!(!improved);
        assert!(reason.contains("all tests still passing"));
    }

    #[test]
    fn test_compare_no_change_failing() {
        let (improved, reason) = compare(&result(false, 1, 2), &result(false, 1, 2));
        assert!(!improved);
        assert!(reason.contains("same failures"));
    }

    #[test]
    fn test_compare_regression() {
        let (improved, reason) = compare(&result(true, 2, 0), &result(false, 1, 1));
        assert!(!improved);
        assert!(reason.contains("regression"));
    }
}
