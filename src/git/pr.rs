//! PR creation via an external forge CLI (`gh`).

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum CreatePrError {
    #[error("gh CLI is not installed")]
    NotInstalled,

    #[error("gh CLI is not authenticated")]
    NotAuthenticated,

    #[error("a pull request already exists for this branch")]
    AlreadyExists,

    #[error("branch has not been pushed to the remote")]
    BranchNotPushed,

    #[error("gh pr create failed: {0}")]
    CommandFailed(String),
}

/// One row of `gh pr list --json`, keyed by branch for the Board
/// Projection's batched PR-state lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct PrSummary {
    #[serde(rename = "headRefName")]
    pub head_ref_name: String,
    pub state: String,
    #[serde(rename = "isDraft")]
    pub is_draft: bool,
    pub url: String,
}

/// Thin wrapper over the `gh` CLI. Kept static-method style to mirror the
/// rest of this module's `GitCli`.
pub struct GhCli;

impl GhCli {
    pub fn is_installed() -> bool {
        which::which("gh").is_ok()
    }

    #[instrument(skip_all)]
    pub async fn check_auth() -> Result<bool, CreatePrError> {
        if !Self::is_installed() {
            return Err(CreatePrError::NotInstalled);
        }
        let output = Command::new("gh")
            .args(["auth", "status"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CreatePrError::CommandFailed(e.to_string()))?;
        Ok(output.status.success())
    }

    /// Create a PR for the branch checked out at `path`, returning its URL.
    #[instrument(skip_all, fields(path = %path.display(), title))]
    pub async fn create_pr(
        path: &Path,
        title: &str,
        body: &str,
        base: &str,
        draft: bool,
    ) -> Result<String, CreatePrError> {
        if !Self::is_installed() {
            return Err(CreatePrError::NotInstalled);
        }

        let mut args = vec!["pr", "create", "--title", title, "--body", body, "--base", base];
        if draft {
            args.push("--draft");
        }

        debug!(?args, "running gh pr create");
        let output = Command::new("gh")
            .args(&args)
            .current_dir(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CreatePrError::CommandFailed(e.to_string()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Self::classify_stderr(&stderr))
    }

    /// One batched query of every PR (open, merged, or closed) against the
    /// repo checked out at `path`, keyed by branch name so the caller can
    /// look up every worktree's PR state without a `gh` call per worktree.
    #[instrument(skip_all)]
    pub async fn list_pr_states(path: &Path) -> Result<Vec<PrSummary>, CreatePrError> {
        if !Self::is_installed() {
            return Err(CreatePrError::NotInstalled);
        }

        let output = Command::new("gh")
            .args([
                "pr",
                "list",
                "--state",
                "all",
                "--json",
                "headRefName,state,isDraft,url",
                "--limit",
                "200",
            ])
            .current_dir(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CreatePrError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify_stderr(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| CreatePrError::CommandFailed(format!("failed to parse gh pr list output: {e}")))
    }

    fn classify_stderr(stderr: &str) -> CreatePrError {
        let lower = stderr.to_lowercase();
        if lower.contains("not logged") || lower.contains("auth") {
            CreatePrError::NotAuthenticated
        } else if lower.contains("already exists") {
            CreatePrError::AlreadyExists
        } else if lower.contains("no commits between") || lower.contains("have you committed") {
            CreatePrError::BranchNotPushed
        } else {
            CreatePrError::CommandFailed(stderr.trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_errors() {
        assert!(matches!(
            GhCli::classify_stderr("error: not logged into any GitHub hosts"),
            CreatePrError::NotAuthenticated
        ));
    }

    #[test]
    fn classifies_existing_pr() {
        assert!(matches!(
            GhCli::classify_stderr("a pull request for branch \"x\" into \"main\" already exists"),
            CreatePrError::AlreadyExists
        ));
    }

    #[test]
    fn classifies_unknown_as_command_failed() {
        assert!(matches!(
            GhCli::classify_stderr("some other failure"),
            CreatePrError::CommandFailed(_)
        ));
    }
}
