// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git worktree management for isolated agent execution.
//!
//! Every agent works in its own `git worktree` so that concurrent
//! edits never collide. The manager owns the lifecycle: it creates
//! worktrees under a configured working directory, extracts the diff
//! of uncommitted changes, and removes everything it created on
//! shutdown.
//!
//! # Directory Structure
//!
//! ```text
//! /repo/                          # Source repository
//! /working-dir/
//! ├── worktree-claude-1a2b3c4d/   # One worktree per agent
//! └── worktree-codex-5e6f7a8b/
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::WorktreeError;

/// Manager for per-agent git worktrees.
pub struct WorktreeManager {
    /// Path to the source repository.
    repo_path: PathBuf,
    /// Directory under which worktrees are created.
    working_dir: PathBuf,
    /// Paths created by this manager, for validation and bulk cleanup.
    /// The lock also serialises the mutating git invocations.
    created: Mutex<Vec<PathBuf>>,
}

impl WorktreeManager {
    /// Creates a new manager for a git repository.
    ///
    /// Validates that `repo_path` is a git working tree and creates
    /// `working_dir` if it does not exist.
    pub async fn new(
        repo_path: impl AsRef<Path>,
        working_dir: impl AsRef<Path>,
    ) -> Result<Self, WorktreeError> {
        let repo_path = repo_path.as_ref().to_path_buf();
        let working_dir = working_dir.as_ref().to_path_buf();

        let check = git(&repo_path, &["rev-parse", "--git-dir"]).await;
        if let Err(e) = check {
            return Err(WorktreeError::InvalidRepo(
                repo_path.display().to_string(),
                e.to_string(),
            ));
        }

        tokio::fs::create_dir_all(&working_dir).await?;

        Ok(Self {
            repo_path,
            working_dir,
            created: Mutex::new(Vec::new()),
        })
    }

    /// Creates a worktree for an agent, anchored to `base_ref`.
    ///
    /// An empty ref means the current `HEAD`. Returns the worktree
    /// path, which carries a collision-resistant suffix.
    pub async fn create(&self, agent_id: &str, base_ref: &str) -> Result<PathBuf, WorktreeError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self
            .working_dir
            .join(format!("worktree-{}-{}", agent_id, &suffix[..8]));
        let base_ref = if base_ref.is_empty() { "HEAD" } else { base_ref };

        let mut created = self.created.lock().await;

        let path_str = path.to_string_lossy().to_string();
        git(&self.repo_path, &["worktree", "add", &path_str, base_ref]).await?;

        created.push(path.clone());
        debug!(agent_id, path = %path.display(), "created worktree");

        Ok(path)
    }

    /// Returns the unified diff of uncommitted changes in a worktree.
    pub async fn get_diff(&self, path: &Path) -> Result<String, WorktreeError> {
        self.ensure_tracked(path).await?;
        git(path, &["diff"]).await
    }

    /// Force-removes a worktree previously created by this manager.
    pub async fn remove(&self, path: &Path) -> Result<(), WorktreeError> {
        let mut created = self.created.lock().await;
        let index = created
            .iter()
            .position(|p| p == path)
            .ok_or_else(|| WorktreeError::InvalidWorktree(path.display().to_string()))?;

        self.remove_unchecked(path).await?;
        created.remove(index);
        Ok(())
    }

    /// Removes every worktree still tracked by this manager.
    ///
    /// Failures are aggregated: the remaining worktrees are still
    /// attempted and one combined error is returned at the end.
    pub async fn cleanup(&self) -> Result<(), WorktreeError> {
        let mut created = self.created.lock().await;
        let mut failures = Vec::new();

        for path in created.drain(..) {
            if let Err(e) = self.remove_unchecked(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove worktree");
                failures.push(format!("{}: {}", path.display(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WorktreeError::Cleanup(failures.join("; ")))
        }
    }

    /// Returns the source repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Returns the number of worktrees currently tracked.
    pub async fn tracked_count(&self) -> usize {
        self.created.lock().await.len()
    }

    async fn ensure_tracked(&self, path: &Path) -> Result<(), WorktreeError> {
        let created = self.created.lock().await;
        if created.iter().any(|p| p == path) {
            Ok(())
        } else {
            Err(WorktreeError::InvalidWorktree(path.display().to_string()))
        }
    }

    async fn remove_unchecked(&self, path: &Path) -> Result<(), WorktreeError> {
        let path_str = path.to_string_lossy().to_string();
        git(
            &self.repo_path,
            &["worktree", "remove", "--force", &path_str],
        )
        .await?;
        Ok(())
    }
}

/// Runs a git command in `dir` and returns stdout, mapping a non-zero
/// exit to [`WorktreeError::Git`] with the captured stderr.
async fn git(dir: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(WorktreeError::Git(stderr.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn init_repo(dir: &Path) {
        tokio::fs::create_dir_all(dir).await.expect("mkdir");
        for args in [
            vec!["init"],
            vec!["config", "user.name", "Gauntlet"],
            vec!["config", "user.email", "gauntlet@example.com"],
        ] {
            let ok = Command::new("git")
                .arg("-C")
                .arg(dir)
                .args(&args)
                .output()
                .await
                .expect("git")
                .status
                .success();
            assert!(ok, "git {:?} failed", args);
        }

        tokio::fs::write(dir.join("README.md"), "hello\n")
            .await
            .expect("write file");

        for args in [vec!["add", "."], vec!["commit", "-m", "init"]] {
            let ok = Command::new("git")
                .arg("-C")
                .arg(dir)
                .args(&args)
                .output()
                .await
                .expect("git")
                .status
                .success();
            assert!(ok, "git {:?} failed", args);
        }
    }

    #[tokio::test]
    async fn test_invalid_repo_rejected() {
        let tmp = tempdir().unwrap();
        let result = WorktreeManager::new(tmp.path().join("nope"), tmp.path().join("work")).await;
        assert!(matches!(result, Err(WorktreeError::InvalidRepo(_, _))));
    }

    #[tokio::test]
    async fn test_create_diff_remove() {
        let tmp = tempdir().unwrap();
        let repo = tmp.path().join("repo");
        init_repo(&repo).await;

        let manager = WorktreeManager::new(&repo, tmp.path().join("work"))
            .await
            .expect("manager");

        let path = manager.create("agent-1", "").await.expect("create");
        assert!(path.exists());
        assert_eq!(manager.tracked_count().await, 1);

        // No changes yet.
        let diff = manager.get_diff(&path).await.expect("diff");
        assert!(diff.trim().is_empty());

        // Modify a file and check the diff picks it up.
        tokio::fs::write(path.join("README.md"), "changed\n")
            .await
            .expect("write");
        let diff = manager.get_diff(&path).await.expect("diff");
        assert!(diff.contains("-hello"));
        assert!(diff.contains("+changed"));

        manager.remove(&path).await.expect("remove");
        assert!(!path.exists());
        assert_eq!(manager.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn test_untracked_paths_rejected() {
        let tmp = tempdir().unwrap();
        let repo = tmp.path().join("repo");
        init_repo(&repo).await;

        let manager = WorktreeManager::new(&repo, tmp.path().join("work"))
            .await
            .expect("manager");

        let stranger = tmp.path().join("somewhere-else");
        assert!(matches!(
            manager.get_diff(&stranger).await,
            Err(WorktreeError::InvalidWorktree(_))
        ));
        assert!(matches!(
            manager.remove(&stranger).await,
            Err(WorktreeError::InvalidWorktree(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_all() {
        let tmp = tempdir().unwrap();
        let repo = tmp.path().join("repo");
        init_repo(&repo).await;

        let manager = WorktreeManager::new(&repo, tmp.path().join("work"))
            .await
            .expect("manager");

        let a = manager.create("a", "").await.expect("create a");
        let b = manager.create("b", "").await.expect("create b");
        assert_ne!(a, b);

        manager.cleanup().await.expect("cleanup");
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(manager.tracked_count().await, 0);
    }
}
