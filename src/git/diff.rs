// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pure utilities for normalizing and measuring unified diffs.
//!
//! The arbitrator compares candidate patches from different agents, so
//! diffs must be stripped of everything that varies between otherwise
//! identical changes: timestamps on `---`/`+++` headers, `index` hash
//! lines, and context lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker appended by git when a file lacks a trailing newline.
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

// Match diff file header: "diff --git a/file.txt b/file.txt"
static FILE_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^diff --git a/(.+) b/(.+)$").unwrap());

// Match hunk header: "@@ -1,7 +1,9 @@"
static HUNK_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+\d+(?:,\d+)? @@").unwrap());

// Match timestamped "---"/"+++" header lines that vary between runs.
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\+\+\+|---) .*\s\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").unwrap());

// Match index lines carrying blob hashes.
static INDEX_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^index [0-9a-f]+\.\.[0-9a-f]+").unwrap());

/// Statistics about a unified diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Number of files modified.
    pub files_changed: usize,
    /// Number of lines added.
    pub lines_added: usize,
    /// Number of lines removed.
    pub lines_removed: usize,
    /// Whether the diff contains merge conflict markers.
    pub has_conflicts: bool,
}

impl DiffStats {
    /// Total changed lines (added plus removed).
    pub fn total_changes(&self) -> usize {
        self.lines_added + self.lines_removed
    }
}

/// Normalizes a diff for consistent comparison.
///
/// Drops timestamp header lines and `index` hash lines, and rewrites
/// `diff --git` headers to canonical form when source and destination
/// paths are equal. Idempotent.
pub fn normalize(diff: &str) -> String {
    let mut normalized = String::new();

    for line in diff.lines() {
        if TIMESTAMP_RE.is_match(line) || INDEX_LINE_RE.is_match(line) {
            continue;
        }

        if let Some(caps) = FILE_HEADER_RE.captures(line) {
            let (a, b) = (&caps[1], &caps[2]);
            if a == b {
                normalized.push_str(&format!("diff --git a/{a} b/{a}\n"));
                continue;
            }
        }

        normalized.push_str(line);
        normalized.push('\n');
    }

    normalized
}

/// Computes statistics for a diff.
///
/// `+++`/`---` header lines are not counted as additions or removals,
/// and lines are only counted once a `diff --git` header has been seen.
pub fn stats(diff: &str) -> DiffStats {
    let mut stats = DiffStats::default();

    if diff.is_empty() {
        return stats;
    }

    let mut in_file = false;
    for line in diff.lines() {
        if FILE_HEADER_RE.is_match(line) {
            stats.files_changed += 1;
            in_file = true;
            continue;
        }

        if !in_file {
            continue;
        }

        if line.starts_with('+') && !line.starts_with("+++") {
            stats.lines_added += 1;
        } else if line.starts_with('-') && !line.starts_with("---") {
            stats.lines_removed += 1;
        }

        if line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
        {
            stats.has_conflicts = true;
        }
    }

    stats
}

/// Reduces a diff to just its headers and changed lines.
pub fn strip_context(diff: &str) -> String {
    let mut result = String::new();

    for line in diff.lines() {
        if FILE_HEADER_RE.is_match(line)
            || HUNK_HEADER_RE.is_match(line)
            || line.starts_with("+++")
            || line.starts_with("---")
            || line.starts_with('+')
            || line.starts_with('-')
            || line.contains(NO_NEWLINE_MARKER)
        {
            result.push_str(line);
            result.push('\n');
        }
    }

    result
}

/// Returns true if two diffs are functionally equivalent, comparing
/// normalized forms with context lines stripped.
pub fn equal_up_to_context(a: &str, b: &str) -> bool {
    strip_context(&normalize(a)) == strip_context(&normalize(b))
}

/// Picks the diff with the most changed lines, skipping diffs that
/// contain conflict markers. Falls back to the first diff when every
/// candidate is conflicted. Returns `None` for an empty slice.
pub fn largest(diffs: &[String]) -> Option<&str> {
    if diffs.is_empty() {
        return None;
    }

    let mut best = 0;
    let mut best_score: i64 = -1;

    for (i, diff) in diffs.iter().enumerate() {
        let stats = stats(diff);
        if stats.has_conflicts {
            continue;
        }

        let score = stats.total_changes() as i64;
        if score > best_score {
            best_score = score;
            best = i;
        }
    }

    Some(&diffs[best])
}
