//! Git Adapter: typed operations keyed on a worktree path.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;

use super::cli::{GitCli, MergeOutcome};
use super::pr::{CreatePrError, GhCli};

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git exited non-zero: {0}")]
    ToolExitNonZero(String),

    #[error("merge conflict in {0:?}")]
    MergeConflict(Vec<String>),

    #[error("PR creation unavailable: {0}")]
    PrUnavailable(String),
}

/// Keyed on a worktree path; every operation is a thin, typed wrapper over
/// [`GitCli`]/[`GhCli`] that maps their `anyhow::Error`s onto [`GitError`].
pub struct GitAdapter {
    worktree_path: PathBuf,
}

impl GitAdapter {
    pub fn new(worktree_path: PathBuf) -> Self {
        Self { worktree_path }
    }

    fn path(&self) -> &Path {
        &self.worktree_path
    }

    #[instrument(skip_all)]
    pub async fn current_branch(&self) -> Result<String, GitError> {
        GitCli::current_branch(self.path())
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    #[instrument(skip_all)]
    pub async fn commits_behind_base(&self, base_branch: &str) -> Result<u32, GitError> {
        GitCli::commits_behind(self.path(), base_branch)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    #[instrument(skip_all)]
    pub async fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        GitCli::is_dirty(self.path())
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    #[instrument(skip_all)]
    pub async fn diff_numstat(
        &self,
        merge_base: &str,
        head: &str,
        exclude_paths: &[String],
    ) -> Result<(u64, u64), GitError> {
        GitCli::diff_numstat(self.path(), merge_base, head, exclude_paths)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    #[instrument(skip_all)]
    pub async fn merge_base(&self, base_branch: &str) -> Result<String, GitError> {
        GitCli::merge_base(self.path(), "HEAD", base_branch)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    /// Merge `base` into the worktree's current branch. Leaves the worktree
    /// in a conflicted state on conflict — it is the caller's
    /// responsibility to resolve or [`Self::abort_merge`].
    #[instrument(skip_all)]
    pub async fn merge_from_base(&self, base: &str) -> Result<(), GitError> {
        match GitCli::merge(self.path(), base)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))?
        {
            MergeOutcome::Clean => Ok(()),
            MergeOutcome::Conflict(files) => Err(GitError::MergeConflict(files)),
        }
    }

    #[instrument(skip_all)]
    pub async fn abort_merge(&self) -> Result<(), GitError> {
        GitCli::abort_merge(self.path())
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    #[instrument(skip_all)]
    pub async fn wip_commit(&self) -> Result<(), GitError> {
        GitCli::wip_commit(self.path())
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    /// Merge the worktree's branch back into `base` (run from the main
    /// project checkout, not the worktree itself).
    #[instrument(skip_all)]
    pub async fn merge_to_base(
        project_path: &Path,
        base: &str,
        branch: &str,
    ) -> Result<(), GitError> {
        let _ = base; // merge target is always the currently checked-out branch in project_path
        match GitCli::merge(project_path, branch)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))?
        {
            MergeOutcome::Clean => Ok(()),
            MergeOutcome::Conflict(files) => Err(GitError::MergeConflict(files)),
        }
    }

    #[instrument(skip_all)]
    pub async fn delete_branch(&self, branch: &str, force: bool) -> Result<(), GitError> {
        GitCli::delete_branch(self.path(), branch, force)
            .await
            .map_err(|e| GitError::ToolExitNonZero(e.to_string()))
    }

    /// Invokes `gh pr create`; returns `PrUnavailable` if `gh` is missing or
    /// not authenticated rather than a hard error (`ToolMissing`
    /// for an optional tool degrades gracefully).
    #[instrument(skip_all, fields(bead_id))]
    pub async fn create_pr(
        &self,
        bead_id: &str,
        title: &str,
        body: &str,
        base: &str,
        draft: bool,
    ) -> Result<String, GitError> {
        if !GhCli::is_installed() {
            return Err(GitError::PrUnavailable("gh is not installed".to_string()));
        }
        match GhCli::create_pr(self.path(), title, body, base, draft).await {
            Ok(url) => Ok(url),
            Err(CreatePrError::NotInstalled) | Err(CreatePrError::NotAuthenticated) => {
                Err(GitError::PrUnavailable(format!(
                    "gh unavailable for bead {bead_id}"
                )))
            }
            Err(e) => Err(GitError::ToolExitNonZero(e.to_string())),
        }
    }
}
